//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! Mocks use `Arc<Mutex<_>>` / atomics for interior mutability, allowing
//! test assertions on recorded calls.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use crate::cursor::ResumptionCursor;
use crate::error::AppError;
use crate::models::{Document, HarvestRecord};
use crate::registry::{ParseJob, ParserRegistry};
use crate::traits::{
    BatchReader, CachePolicy, Fetcher, HarvestBatch, Parser, RecordSink, SurrogateStore,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that pops scripted byte responses, recording every URL.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<Vec<Result<Vec<u8>, AppError>>>>,
    fallback: Option<Vec<u8>>,
    pub fetched: Arc<Mutex<Vec<Url>>>,
}

impl MockFetcher {
    /// Returns the same bytes for every fetch.
    pub fn always(bytes: Vec<u8>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            fallback: Some(bytes),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Each call pops the first response; when exhausted, fetches fail.
    pub fn with_responses(responses: Vec<Result<Vec<u8>, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fallback: None,
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &Url, _policy: CachePolicy) -> Result<Vec<u8>, AppError> {
        self.fetched.lock().unwrap().push(url.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            match &self.fallback {
                Some(bytes) => Ok(bytes.clone()),
                None => Err(AppError::Fetch("no scripted response left".into())),
            }
        } else {
            responses.remove(0)
        }
    }

    async fn fetch_to_file(
        &self,
        url: &Url,
        policy: CachePolicy,
        dest: &Path,
    ) -> Result<(), AppError> {
        let bytes = self.fetch(url, policy).await?;
        std::fs::write(dest, bytes)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SlowFetcher
// ---------------------------------------------------------------------------

/// Fetcher that sleeps, tracks its concurrency high-water mark, and then
/// fails. Used to observe scheduler admission behavior.
#[derive(Clone)]
pub struct SlowFetcher {
    delay: Duration,
    concurrent: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

impl SlowFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of fetches ever in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

impl Fetcher for SlowFetcher {
    async fn fetch(&self, _url: &Url, _policy: CachePolicy) -> Result<Vec<u8>, AppError> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Err(AppError::Fetch("network disabled in tests".into()))
    }

    async fn fetch_to_file(
        &self,
        url: &Url,
        policy: CachePolicy,
        _dest: &Path,
    ) -> Result<(), AppError> {
        self.fetch(url, policy).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser with a configurable capability declaration that either
/// succeeds with a marker document or fails with a parse error. Counts
/// invocations.
pub struct MockParser {
    name: String,
    content_types: Vec<String>,
    extensions: Vec<String>,
    fail_reason: Option<String>,
    calls: AtomicUsize,
}

impl MockParser {
    pub fn succeeding(name: &str, content_types: &[&str], extensions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            content_types: content_types.iter().map(|s| s.to_string()).collect(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            fail_reason: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str, content_types: &[&str], extensions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            content_types: content_types.iter().map(|s| s.to_string()).collect(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            fail_reason: Some("simulated parse failure".to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Parser for MockParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_content_types(&self) -> Vec<String> {
        self.content_types.clone()
    }

    fn supported_extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn parse(&self, job: &ParseJob<'_>, _registry: &ParserRegistry) -> Result<Document, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_reason {
            Some(reason) => Err(AppError::parse_failure(reason.clone(), job.location)),
            None => Ok(Document::new(
                job.location,
                job.content_type.clone(),
                format!("parsed by {}", self.name),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySurrogateStore
// ---------------------------------------------------------------------------

/// Surrogate store keeping committed batches in memory.
#[derive(Clone, Default)]
pub struct MemorySurrogateStore {
    batches: Arc<Mutex<Vec<Vec<HarvestRecord>>>>,
}

impl MemorySurrogateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed batches, in commit order.
    pub fn batches(&self) -> Vec<Vec<HarvestRecord>> {
        self.batches.lock().unwrap().clone()
    }
}

impl SurrogateStore for MemorySurrogateStore {
    type Batch = MemoryRecordSink;

    fn begin_batch(&self, _source: &Url) -> Result<MemoryRecordSink, AppError> {
        Ok(MemoryRecordSink {
            pending: Vec::new(),
            batches: Arc::clone(&self.batches),
        })
    }
}

pub struct MemoryRecordSink {
    pending: Vec<HarvestRecord>,
    batches: Arc<Mutex<Vec<Vec<HarvestRecord>>>>,
}

impl RecordSink for MemoryRecordSink {
    fn append(&mut self, record: &HarvestRecord) -> Result<(), AppError> {
        self.pending.push(record.clone());
        Ok(())
    }

    fn commit(self) -> Result<(), AppError> {
        self.batches.lock().unwrap().push(self.pending);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedBatchReader
// ---------------------------------------------------------------------------

/// Batch reader that replays scripted pages instead of parsing bytes.
///
/// Each page is `(records, resumption token)`; a `None` token makes that
/// page the last one. When the script is exhausted the reader reports an
/// empty, exhausted page.
#[derive(Clone)]
pub struct ScriptedBatchReader {
    pages: Arc<Mutex<Vec<(Vec<HarvestRecord>, Option<String>)>>>,
    fail_reason: Option<String>,
    position: Arc<AtomicU64>,
}

impl ScriptedBatchReader {
    pub fn pages(pages: Vec<(Vec<HarvestRecord>, Option<&str>)>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(
                pages
                    .into_iter()
                    .map(|(records, token)| (records, token.map(|t| t.to_string())))
                    .collect(),
            )),
            fail_reason: None,
            position: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Reader that fails every page with a parse error.
    pub fn failing(reason: &str) -> Self {
        Self {
            pages: Arc::new(Mutex::new(Vec::new())),
            fail_reason: Some(reason.to_string()),
            position: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl BatchReader for ScriptedBatchReader {
    fn read_page<S: RecordSink>(
        &self,
        source: &Url,
        _bytes: &[u8],
        sink: &mut S,
    ) -> Result<HarvestBatch, AppError> {
        if let Some(reason) = &self.fail_reason {
            return Err(AppError::parse_failure(reason.clone(), source));
        }
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            return Ok(HarvestBatch {
                records: 0,
                cursor: ResumptionCursor::exhausted_at(self.position.load(Ordering::SeqCst)),
            });
        }
        let (records, token) = pages.remove(0);
        for record in &records {
            sink.append(record)?;
        }
        let count = records.len() as u64;
        let position = self.position.fetch_add(count, Ordering::SeqCst) + count;
        let cursor = match token {
            Some(token) => ResumptionCursor::resuming(token, position),
            None => ResumptionCursor::exhausted_at(position),
        };
        Ok(HarvestBatch {
            records: count,
            cursor,
        })
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a numbered harvest record.
pub fn make_record(i: u64) -> HarvestRecord {
    HarvestRecord {
        guid: Some(format!("rec-{i}")),
        title: Some(format!("Record {i}")),
        link: Some(format!("http://example.org/item/{i}")),
        description: None,
        pubdate: None,
    }
}
