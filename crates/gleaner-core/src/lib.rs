pub mod content;
pub mod cursor;
pub mod error;
pub mod harvest;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod surrogate;
pub mod testutil;
pub mod traits;

pub use content::{ContentKind, extension_of, fold_key, normalize_content_type};
pub use cursor::ResumptionCursor;
pub use error::AppError;
pub use harvest::{HarvestJob, HarvestPhase};
pub use models::{Document, HarvestRecord, stable_id};
pub use registry::{MAX_PARSE_DEPTH, ParseJob, ParserRegistry};
pub use scheduler::{HarvestScheduler, SchedulerConfig};
pub use surrogate::FileSurrogateStore;
pub use traits::{
    BatchReader, CachePolicy, DocumentSink, Fetcher, HarvestBatch, NullSink, Parser, RecordSink,
    SurrogateStore,
};
