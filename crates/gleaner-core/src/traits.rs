use std::future::Future;
use std::path::Path;

use url::Url;

use crate::cursor::ResumptionCursor;
use crate::error::AppError;
use crate::models::{Document, HarvestRecord};
use crate::registry::{ParseJob, ParserRegistry};

/// A pluggable content extractor: turns bytes of a declared format into a
/// structured [`Document`].
///
/// Capability declarations (`supported_*`) are consulted only at
/// registration time. `parse` receives fully buffered bytes through the
/// [`ParseJob`], so a failed candidate never poisons the input for the
/// next one. Implementations must check the job's cancellation token at
/// loop boundaries and clean up any side effects (temp files) on every
/// exit path.
///
/// Container formats are not a special type: a container plugin decodes
/// its payload and calls back into [`ParserRegistry::parse_within`],
/// chaining dispatch. The registry bounds that recursion.
pub trait Parser: Send + Sync {
    /// Stable identity, used in logs and registration collision warnings.
    fn name(&self) -> &str;

    fn supported_content_types(&self) -> Vec<String>;

    fn supported_extensions(&self) -> Vec<String>;

    fn parse(&self, job: &ParseJob<'_>, registry: &ParserRegistry) -> Result<Document, AppError>;
}

/// Caching behavior for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Bypass the cache entirely.
    NoCache,
    /// Serve from cache only; fail if absent.
    CacheOnly,
    /// Serve from cache when fresh, else hit the network and refill.
    IfFresh,
}

/// Retrieves resource bytes under a caching policy.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &Url,
        policy: CachePolicy,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// Fetch and deliver to a destination file instead of memory.
    fn fetch_to_file(
        &self,
        url: &Url,
        policy: CachePolicy,
        dest: &Path,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Streaming sink for the records of one harvested batch.
///
/// Records are appended as they are read off the wire; `commit` finalizes
/// the batch durably. Dropping a sink without committing discards it.
pub trait RecordSink: Send {
    fn append(&mut self, record: &HarvestRecord) -> Result<(), AppError>;

    fn commit(self) -> Result<(), AppError>
    where
        Self: Sized;
}

/// Durable staging area for harvested batches, one uniquely named file
/// per batch.
pub trait SurrogateStore: Send + Sync + Clone {
    type Batch: RecordSink;

    fn begin_batch(&self, source: &Url) -> Result<Self::Batch, AppError>;
}

/// Summary of one harvested page.
#[derive(Debug, Clone)]
pub struct HarvestBatch {
    /// Records streamed into the sink for this page.
    pub records: u64,
    /// Paging position after this page; exhausted when it yields no next URL.
    pub cursor: ResumptionCursor,
}

/// Parses one fetched listing page: streams every record into the sink as
/// it is read, and returns the page's record count plus the resumption
/// cursor for the next page. The wire format behind this is an
/// implementation detail of the reader.
pub trait BatchReader: Send + Sync + Clone {
    fn read_page<S: RecordSink>(
        &self,
        source: &Url,
        bytes: &[u8],
        sink: &mut S,
    ) -> Result<HarvestBatch, AppError>;
}

/// Receives finished documents, keyed by their stable id (upsert).
pub trait DocumentSink: Send + Sync + Clone {
    fn upsert(&self, document: &Document) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op DocumentSink for use when indexing is not wired up.
#[derive(Debug, Clone)]
pub struct NullSink;

impl DocumentSink for NullSink {
    async fn upsert(&self, _document: &Document) -> Result<(), AppError> {
        Ok(())
    }
}
