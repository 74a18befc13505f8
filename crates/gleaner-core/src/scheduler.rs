//! Harvest scheduling: lifecycle sets, admission under a concurrency
//! ceiling, and host-level de-duplication against surrogate storage.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cursor::ResumptionCursor;
use crate::error::AppError;
use crate::harvest::HarvestJob;
use crate::traits::{BatchReader, Fetcher, SurrogateStore};

/// Fixed literal tag identifying harvested surrogate files.
pub const FILENAME_PREFIX: &str = "gleaner";
/// Replacement for host/path separators inside a host identity.
pub const HOST_FILLER: char = '_';

const FILENAME_SUFFIX: &str = ".xml";
/// Fixed-width, lexicographically sortable stamp. The surrogate scan
/// locates the stamp by offset from the end of the filename, so this
/// width must never change without a migration.
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const STAMP_LEN: usize = 17;

/// Canonical host identity of a source URL: scheme and query stripped,
/// trailing separators removed, remaining separators replaced with
/// [`HOST_FILLER`]. Deterministic, so de-duplication lookups and filename
/// generation always agree.
pub fn host_id(source: &Url) -> String {
    let mut s = ResumptionCursor::truncated_url(source);
    if let Some(stripped) = s.strip_suffix('?') {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_suffix('/') {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_prefix("https://") {
        s = stripped.to_string();
    } else if let Some(stripped) = s.strip_prefix("http://") {
        s = stripped.to_string();
    }
    s.chars()
        .map(|c| match c {
            '.' | '/' | ':' => HOST_FILLER,
            other => other,
        })
        .collect()
}

pub fn format_stamp(when: DateTime<Utc>) -> String {
    when.format(STAMP_FORMAT).to_string()
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Surrogate filename for one harvested batch:
/// `<prefix>.<host_id>.<stamp>.xml`. Different for each call on the same
/// host because the stamp advances.
pub fn filename_for_source(source: &Url, when: DateTime<Utc>) -> String {
    format!(
        "{FILENAME_PREFIX}.{}.{}{FILENAME_SUFFIX}",
        host_id(source),
        format_stamp(when)
    )
}

/// Scan surrogate filenames and keep the most recent stamp per host.
///
/// Files that do not match the naming convention are skipped.
pub fn loaded_hosts(surrogates: &Path) -> Result<HashMap<String, DateTime<Utc>>, AppError> {
    let mut map: HashMap<String, DateTime<Utc>> = HashMap::new();
    let tail_len = 1 + STAMP_LEN + FILENAME_SUFFIX.len();
    for entry in std::fs::read_dir(surrogates)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(FILENAME_PREFIX) || !name.ends_with(FILENAME_SUFFIX) {
            continue;
        }
        // shortest legal name has a one-character host identity
        if name.len() < FILENAME_PREFIX.len() + 2 + tail_len {
            continue;
        }
        let bytes = name.as_bytes();
        let sep = name.len() - tail_len;
        if bytes[sep] != b'.' || bytes[FILENAME_PREFIX.len()] != b'.' {
            continue;
        }
        let stamp = &name[sep + 1..name.len() - FILENAME_SUFFIX.len()];
        let host = &name[FILENAME_PREFIX.len() + 1..sep];
        let Some(when) = parse_stamp(stamp) else {
            continue;
        };
        map.entry(host.to_string())
            .and_modify(|existing| {
                if when > *existing {
                    *existing = when;
                }
            })
            .or_insert(when);
    }
    Ok(map)
}

/// Filter a candidate list down to sources whose host was never
/// harvested, or was last harvested at or before `now - stale_limit`.
pub fn unloaded_sources(
    candidates: &[Url],
    surrogates: &Path,
    stale_limit: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Url>, AppError> {
    let loaded = loaded_hosts(surrogates)?;
    let limit = now - stale_limit;
    Ok(candidates
        .iter()
        .filter(|source| match loaded.get(&host_id(source)) {
            Some(last) => *last <= limit,
            None => true,
        })
        .cloned()
        .collect())
}

/// Parse a CSV source registry into candidate URLs.
///
/// The registry format keeps the endpoint URL in the third column; rows
/// without a usable URL there are skipped.
pub fn listed_sources<R: std::io::Read>(input: R) -> Vec<Url> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut sources = Vec::new();
    for row in reader.records() {
        let Ok(row) = row else { continue };
        let Some(field) = row.get(2) else { continue };
        if field.starts_with("http://") || field.starts_with("https://") {
            if let Ok(url) = Url::parse(field) {
                sources.push(url);
            }
        }
    }
    sources
}

/// Admission and backoff tuning for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrency ceiling: the running set never exceeds this size.
    pub max_running: usize,
    /// Backoff interval for queued jobs polling for a free slot.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_running: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct LifecycleSets {
    queued: BTreeMap<u64, Arc<HarvestJob>>,
    running: BTreeMap<u64, Arc<HarvestJob>>,
    finished: BTreeMap<u64, Arc<HarvestJob>>,
}

/// Process-wide registry of harvest jobs.
///
/// Owns the three disjoint lifecycle sets, ordered by job serial for
/// deterministic enumeration; every move between sets happens under one
/// lock. The ceiling gates admission only; a running job is never
/// interrupted to enforce it. One tokio task per job executes the running
/// loop, and a queued job waits with bounded-interval backoff until a
/// slot frees.
pub struct HarvestScheduler<F, B, S>
where
    F: Fetcher + 'static,
    B: BatchReader + 'static,
    S: SurrogateStore + 'static,
{
    fetcher: F,
    reader: B,
    store: S,
    config: SchedulerConfig,
    sets: Arc<Mutex<LifecycleSets>>,
    cancel: CancellationToken,
}

impl<F, B, S> HarvestScheduler<F, B, S>
where
    F: Fetcher + 'static,
    B: BatchReader + 'static,
    S: SurrogateStore + 'static,
{
    pub fn new(fetcher: F, reader: B, store: S, config: SchedulerConfig) -> Self {
        Self {
            fetcher,
            reader,
            store,
            config,
            sets: Arc::new(Mutex::new(LifecycleSets::default())),
            cancel: CancellationToken::new(),
        }
    }

    fn lock_sets(sets: &Mutex<LifecycleSets>) -> MutexGuard<'_, LifecycleSets> {
        sets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a job for `source` and spawn its driver task.
    pub fn submit(&self, source: &Url) -> Result<Arc<HarvestJob>, AppError> {
        let job = HarvestJob::new(source)?;
        Self::lock_sets(&self.sets)
            .queued
            .insert(job.serial(), job.clone());
        tracing::info!(serial = job.serial(), source = %job.source(), "harvest job queued");

        let sets = Arc::clone(&self.sets);
        let fetcher = self.fetcher.clone();
        let reader = self.reader.clone();
        let store = self.store.clone();
        let cancel = self.cancel.clone();
        let poll_interval = self.config.poll_interval;
        let max_running = self.config.max_running;
        let task_job = job.clone();

        tokio::spawn(async move {
            loop {
                let admitted = {
                    let mut sets = Self::lock_sets(&sets);
                    if sets.running.len() < max_running {
                        match sets.queued.remove(&task_job.serial()) {
                            Some(j) => {
                                sets.running.insert(j.serial(), j);
                                true
                            }
                            // withdrawn while waiting
                            None => return,
                        }
                    } else {
                        false
                    }
                };
                if admitted {
                    break;
                }
                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    () = cancel.cancelled() => return,
                }
            }

            task_job.run(&fetcher, &reader, &store, &cancel).await;

            let mut sets = Self::lock_sets(&sets);
            if let Some(j) = sets.running.remove(&task_job.serial()) {
                sets.finished.insert(j.serial(), j);
            }
        });

        Ok(job)
    }

    pub fn queued(&self) -> Vec<Arc<HarvestJob>> {
        Self::lock_sets(&self.sets).queued.values().cloned().collect()
    }

    pub fn running(&self) -> Vec<Arc<HarvestJob>> {
        Self::lock_sets(&self.sets)
            .running
            .values()
            .cloned()
            .collect()
    }

    pub fn finished(&self) -> Vec<Arc<HarvestJob>> {
        Self::lock_sets(&self.sets)
            .finished
            .values()
            .cloned()
            .collect()
    }

    /// Stop admitting queued jobs and signal running jobs to stop at
    /// their next loop iteration.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::HarvestPhase;
    use crate::testutil::{MemorySurrogateStore, ScriptedBatchReader, SlowFetcher, make_record};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn host_id_is_deterministic_and_collision_free() {
        let a = url("http://a.example.org/x");
        let b = url("http://b.example.org/x");
        assert_eq!(host_id(&a), host_id(&a));
        assert_ne!(host_id(&a), host_id(&b));
        assert_eq!(host_id(&a), "a_example_org_x");
    }

    #[test]
    fn host_id_strips_scheme_query_and_trailing_separators() {
        assert_eq!(
            host_id(&url("https://archive.example.org/oai/?verb=ListRecords")),
            "archive_example_org_oai"
        );
        assert_eq!(
            host_id(&url("http://archive.example.org:8080/oai")),
            "archive_example_org_8080_oai"
        );
    }

    #[test]
    fn stamp_is_fixed_width() {
        let stamp = format_stamp(Utc::now());
        assert_eq!(stamp.len(), STAMP_LEN);
        assert!(stamp.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn filename_scan_recovers_latest_stamp_per_host() {
        let dir = tempfile::tempdir().unwrap();
        let source = url("http://archive.example.org/oai");
        let old = Utc::now() - chrono::Duration::days(10);
        let new = Utc::now() - chrono::Duration::days(1);
        for when in [old, new] {
            let path = dir.path().join(filename_for_source(&source, when));
            std::fs::write(path, b"<surrogate/>").unwrap();
        }
        // noise that must be skipped
        std::fs::write(dir.path().join("unrelated.xml"), b"").unwrap();
        std::fs::write(dir.path().join("gleaner.bad-stamp.notdigits12345xx.xml"), b"").unwrap();

        let loaded = loaded_hosts(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        let seen = loaded.get(&host_id(&source)).unwrap();
        // millisecond precision survives the filename round-trip
        assert_eq!(format_stamp(*seen), format_stamp(new));
    }

    #[test]
    fn unloaded_sources_applies_staleness_window() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let fresh = url("http://fresh.example.org/oai");
        let stale = url("http://stale.example.org/oai");
        let never = url("http://never.example.org/oai");
        std::fs::write(
            dir.path()
                .join(filename_for_source(&fresh, now - chrono::Duration::hours(1))),
            b"",
        )
        .unwrap();
        std::fs::write(
            dir.path()
                .join(filename_for_source(&stale, now - chrono::Duration::days(30))),
            b"",
        )
        .unwrap();

        let candidates = vec![fresh.clone(), stale.clone(), never.clone()];
        let eligible =
            unloaded_sources(&candidates, dir.path(), chrono::Duration::days(7), now).unwrap();
        assert_eq!(eligible, vec![stale, never]);
    }

    #[test]
    fn listed_sources_reads_third_column() {
        let csv_data = b"\
name,country,url\n\
Archive A,DE,http://a.example.org/oai\n\
No Url,FR,not-a-url\n\
short,row\n\
Archive B,US,https://b.example.org/oai2\n";
        let sources = listed_sources(&csv_data[..]);
        assert_eq!(
            sources,
            vec![
                url("http://a.example.org/oai"),
                url("https://b.example.org/oai2"),
            ]
        );
    }

    #[tokio::test]
    async fn ceiling_bounds_the_running_set() {
        let fetcher = SlowFetcher::new(Duration::from_millis(25));
        let reader = ScriptedBatchReader::pages(vec![]);
        let store = MemorySurrogateStore::new();
        let scheduler = HarvestScheduler::new(
            fetcher.clone(),
            reader,
            store,
            SchedulerConfig {
                max_running: 2,
                poll_interval: Duration::from_millis(5),
            },
        );

        for i in 0..6 {
            scheduler
                .submit(&url(&format!("http://host{i}.example.org/oai")))
                .unwrap();
        }

        for _ in 0..1000 {
            if scheduler.finished().len() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(scheduler.finished().len(), 6);
        assert!(scheduler.queued().is_empty());
        assert!(scheduler.running().is_empty());
        assert!(
            fetcher.max_concurrent() <= 2,
            "running ceiling violated: {} concurrent fetches",
            fetcher.max_concurrent()
        );
    }

    #[tokio::test]
    async fn finished_jobs_enumerate_in_serial_order() {
        let fetcher = SlowFetcher::new(Duration::from_millis(1));
        let reader = ScriptedBatchReader::pages(vec![(vec![make_record(1)], None)]);
        let store = MemorySurrogateStore::new();
        let scheduler =
            HarvestScheduler::new(fetcher, reader, store, SchedulerConfig::default());

        let a = scheduler.submit(&url("http://a.example.org/oai")).unwrap();
        let b = scheduler.submit(&url("http://b.example.org/oai")).unwrap();

        for _ in 0..1000 {
            if scheduler.finished().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let finished = scheduler.finished();
        assert_eq!(finished.len(), 2);
        assert!(finished[0].serial() < finished[1].serial());
        assert_eq!(finished[0].serial(), a.serial());
        assert_eq!(finished[1].serial(), b.serial());
        assert!(finished.iter().all(|j| j.phase() == HarvestPhase::Finished));
    }
}
