//! Resumable harvest importer: one job drives one source through repeated
//! cursor-paged fetch/persist cycles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cursor::ResumptionCursor;
use crate::error::AppError;
use crate::traits::{BatchReader, CachePolicy, Fetcher, RecordSink, SurrogateStore};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of a harvest job: `Queued -> Running -> Finished`,
/// no other transitions, no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Queued,
    Running,
    Finished,
}

impl HarvestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestPhase::Queued => "queued",
            HarvestPhase::Running => "running",
            HarvestPhase::Finished => "finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HarvestPhase::Finished)
    }
}

impl fmt::Display for HarvestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct JobState {
    phase: HarvestPhase,
    source: Url,
    records: u64,
    chunks: u64,
    status: String,
    cursor: Option<ResumptionCursor>,
    finished_at: Option<DateTime<Utc>>,
}

/// An independently schedulable harvest unit.
///
/// Identity is a monotonic serial number, used only as a total order and
/// tie-break for deterministic enumeration, never as a priority. The job
/// holds its own mutable progress state; the scheduler decides when the
/// run loop executes and on which task.
pub struct HarvestJob {
    serial: u64,
    started_at: DateTime<Utc>,
    state: Mutex<JobState>,
}

impl HarvestJob {
    /// Create a queued job bound to `source`, rewritten into the
    /// endpoint's initial page-listing form.
    pub fn new(source: &Url) -> Result<Arc<Self>, AppError> {
        let source = ResumptionCursor::initial_url(source)?;
        Ok(Arc::new(Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            started_at: Utc::now(),
            state: Mutex::new(JobState {
                phase: HarvestPhase::Queued,
                source,
                records: 0,
                chunks: 0,
                status: "import initialized".to_string(),
                cursor: None,
                finished_at: None,
            }),
        }))
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Current source URL (advances as pages are consumed).
    pub fn source(&self) -> Url {
        self.state().source.clone()
    }

    /// Cumulative records across all pages.
    pub fn count(&self) -> u64 {
        self.state().records
    }

    /// Pages consumed so far.
    pub fn chunk_count(&self) -> u64 {
        self.state().chunks
    }

    /// Current human-readable status message.
    pub fn status(&self) -> String {
        self.state().status.clone()
    }

    pub fn phase(&self) -> HarvestPhase {
        self.state().phase
    }

    pub fn cursor(&self) -> Option<ResumptionCursor> {
        self.state().cursor.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state().finished_at
    }

    /// Elapsed running time: finish−start once finished, wall-clock
    /// now−start while alive.
    pub fn running_time(&self) -> chrono::Duration {
        match self.state().finished_at {
            Some(finished) => finished - self.started_at,
            None => Utc::now() - self.started_at,
        }
    }

    /// Throughput in records per second. A job with no measurable elapsed
    /// time reports zero rather than dividing by it.
    pub fn speed(&self) -> f64 {
        let millis = self.running_time().num_milliseconds();
        if millis <= 0 {
            return 0.0;
        }
        (self.count() as f64) * 1000.0 / (millis as f64)
    }

    fn finish(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state();
        state.status = message.clone();
        state.finished_at = Some(Utc::now());
        state.phase = HarvestPhase::Finished;
        drop(state);
        tracing::info!(
            serial = self.serial,
            records = self.count(),
            chunks = self.chunk_count(),
            status = %message,
            "harvest job finished"
        );
    }

    /// Execute the running loop until cursor exhaustion or failure.
    ///
    /// Each iteration fetches the current listing page, streams its
    /// records into a fresh surrogate batch, and advances the cursor.
    /// Exhaustion is a normal terminal state; any fetch/persist failure
    /// terminates the job with the failure message as its status; retry
    /// is a scheduler-level policy, never performed here. Cancellation is
    /// cooperative, checked at the top of each iteration.
    pub async fn run<F, B, S>(&self, fetcher: &F, reader: &B, store: &S, cancel: &CancellationToken)
    where
        F: Fetcher,
        B: BatchReader,
        S: SurrogateStore,
    {
        {
            let mut state = self.state();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = HarvestPhase::Running;
            state.status = "loading first part of records".to_string();
        }

        loop {
            if cancel.is_cancelled() {
                self.finish("import interrupted");
                return;
            }

            let current = self.source();
            let bytes = match fetcher.fetch(&current, CachePolicy::NoCache).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.finish(e.to_string());
                    return;
                }
            };

            let mut sink = match store.begin_batch(&current) {
                Ok(sink) => sink,
                Err(e) => {
                    self.finish(e.to_string());
                    return;
                }
            };
            let batch = match reader.read_page(&current, &bytes, &mut sink) {
                Ok(batch) => batch,
                Err(e) => {
                    self.finish(e.to_string());
                    return;
                }
            };
            if let Err(e) = sink.commit() {
                self.finish(e.to_string());
                return;
            }

            let next = batch.cursor.next_url(&current);
            {
                let mut state = self.state();
                state.chunks += 1;
                state.records += batch.records;
                state.cursor = Some(batch.cursor.clone());
            }

            match next {
                None => {
                    self.finish("terminated, no further resumption");
                    return;
                }
                Some(next_url) => {
                    let mut state = self.state();
                    state.source = next_url;
                    state.status = format!(
                        "loading next resumption fragment, cursor = {}",
                        batch.cursor.cursor
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testutil::{MemorySurrogateStore, MockFetcher, ScriptedBatchReader, make_record};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn source() -> Url {
        url("http://archive.example.org/oai")
    }

    #[test]
    fn new_job_is_queued_with_rewritten_source() {
        let job = HarvestJob::new(&source()).unwrap();
        assert_eq!(job.phase(), HarvestPhase::Queued);
        assert_eq!(job.status(), "import initialized");
        assert!(job.source().query().unwrap().contains("verb=ListRecords"));
        assert_eq!(job.count(), 0);
        assert_eq!(job.chunk_count(), 0);
    }

    #[test]
    fn serials_are_strictly_increasing() {
        let a = HarvestJob::new(&source()).unwrap();
        let b = HarvestJob::new(&source()).unwrap();
        assert!(b.serial() > a.serial());
    }

    #[test]
    fn fresh_job_reports_zero_speed() {
        let job = HarvestJob::new(&source()).unwrap();
        assert_eq!(job.speed(), 0.0);
    }

    #[tokio::test]
    async fn accumulates_across_pages_until_exhaustion() {
        let job = HarvestJob::new(&source()).unwrap();
        let fetcher = MockFetcher::always(b"<page/>".to_vec());
        let reader = ScriptedBatchReader::pages(vec![
            (vec![make_record(1), make_record(2)], Some("t1")),
            (vec![make_record(3), make_record(4), make_record(5)], Some("t2")),
            (vec![make_record(6)], None),
        ]);
        let store = MemorySurrogateStore::new();
        let cancel = CancellationToken::new();

        job.run(&fetcher, &reader, &store, &cancel).await;

        assert_eq!(job.phase(), HarvestPhase::Finished);
        assert_eq!(job.chunk_count(), 3);
        assert_eq!(job.count(), 6);
        assert_eq!(job.status(), "terminated, no further resumption");
        assert!(job.finished_at().is_some());
        // every page landed in its own committed batch
        assert_eq!(store.batches().len(), 3);
        assert_eq!(store.batches()[1].len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_terminates_after_successful_chunk() {
        let job = HarvestJob::new(&source()).unwrap();
        let fetcher = MockFetcher::with_responses(vec![
            Ok(b"<page/>".to_vec()),
            Err(AppError::Fetch("connection reset".into())),
        ]);
        let reader = ScriptedBatchReader::pages(vec![(
            vec![make_record(1), make_record(2)],
            Some("t1"),
        )]);
        let store = MemorySurrogateStore::new();
        let cancel = CancellationToken::new();

        job.run(&fetcher, &reader, &store, &cancel).await;

        assert_eq!(job.phase(), HarvestPhase::Finished);
        assert_eq!(job.chunk_count(), 1);
        assert_eq!(job.count(), 2);
        assert!(job.status().contains("connection reset"));
        assert_eq!(store.batches().len(), 1);
    }

    #[tokio::test]
    async fn reader_failure_terminates_job() {
        let job = HarvestJob::new(&source()).unwrap();
        let fetcher = MockFetcher::always(b"garbage".to_vec());
        let reader = ScriptedBatchReader::failing("unexpected end of listing");
        let store = MemorySurrogateStore::new();
        let cancel = CancellationToken::new();

        job.run(&fetcher, &reader, &store, &cancel).await;

        assert_eq!(job.phase(), HarvestPhase::Finished);
        assert_eq!(job.chunk_count(), 0);
        assert!(job.status().contains("unexpected end of listing"));
    }

    #[tokio::test]
    async fn cancellation_is_observed_at_loop_top() {
        let job = HarvestJob::new(&source()).unwrap();
        let fetcher = MockFetcher::always(b"<page/>".to_vec());
        let reader = ScriptedBatchReader::pages(vec![(vec![make_record(1)], Some("t1"))]);
        let store = MemorySurrogateStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        job.run(&fetcher, &reader, &store, &cancel).await;

        assert_eq!(job.phase(), HarvestPhase::Finished);
        assert_eq!(job.status(), "import interrupted");
        assert_eq!(job.chunk_count(), 0);
    }

    #[tokio::test]
    async fn finished_job_does_not_rerun() {
        let job = HarvestJob::new(&source()).unwrap();
        let fetcher = MockFetcher::always(b"<page/>".to_vec());
        let reader = ScriptedBatchReader::pages(vec![(vec![make_record(1)], None)]);
        let store = MemorySurrogateStore::new();
        let cancel = CancellationToken::new();

        job.run(&fetcher, &reader, &store, &cancel).await;
        assert_eq!(job.chunk_count(), 1);

        // a second run must be a no-op on the immutable finished job
        job.run(&fetcher, &reader, &store, &cancel).await;
        assert_eq!(job.chunk_count(), 1);
        assert_eq!(store.batches().len(), 1);
    }
}
