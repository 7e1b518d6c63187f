//! Storage backend trait and implementations
//!
//! Provides abstraction layer for the durable certification store
//! (state file, PostgreSQL). Both backends hold three collections:
//! certification progress, certified spans and coverage sets.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use tehom_state::{
    CoverageRecord, ProgressRecord, RangeRecord, SpanRecord, StateFile, StateFormat, StatePayload,
    StateReader, StateWriter,
};

use crate::interval::{Interval, IntervalSet, Timestamp};
use crate::storage_config::{FilesystemConfig, PostgresqlConfig};

/// Identifies one coverage set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpanKey {
    pub sensor: String,
    pub extension: String,
}

impl SpanKey {
    pub fn new(sensor: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            extension: extension.into(),
        }
    }
}

impl std::fmt::Display for SpanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sensor, self.extension)
    }
}

/// Audio availability confirmed against the catalog, with the sensor
/// position it was recorded at
#[derive(Debug, Clone, PartialEq)]
pub struct CertifiedSpan {
    pub sensor: String,
    pub interval: Interval,
    pub lat: f64,
    pub lon: f64,
}

/// A certified span as stored, with its row id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSpan {
    pub id: i64,
    pub span: CertifiedSpan,
}

/// `(sensor, deployment begin)` to last fully certified end
pub type CertificationProgress = BTreeMap<(String, Timestamp), Timestamp>;

/// Everything produced by certifying one deployment record, written in a
/// single durable operation
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub sensor: String,
    /// Progress key: the deployment's original begin
    pub begin: Timestamp,
    pub certified_end: Timestamp,
    /// Last stored span with its new bounds
    pub extended: Option<StoredSpan>,
    pub inserted: Vec<CertifiedSpan>,
    pub key: SpanKey,
    pub coverage: IntervalSet,
}

/// Rows removed by a reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub progress: u64,
    pub spans: u64,
    pub coverage: u64,
}

/// Full store contents, used for migration between backends
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub progress: CertificationProgress,
    pub spans: Vec<StoredSpan>,
    pub coverage: Vec<(SpanKey, IntervalSet)>,
}

/// Named interval sets with merge-on-write
#[async_trait]
pub trait SpanStore: Send + Sync {
    /// Stored set for `key`, empty if absent
    async fn get(&self, key: &SpanKey) -> Result<IntervalSet>;

    /// Union `intervals` into the stored set and atomically replace it
    async fn merge(&self, key: &SpanKey, intervals: &IntervalSet) -> Result<IntervalSet>;
}

/// Durable store driven by the certifier
#[async_trait]
pub trait CertificationStore: SpanStore {
    async fn load_progress(&self) -> Result<CertificationProgress>;

    /// Most recent certified span for a sensor
    async fn last_span(&self, sensor: &str) -> Result<Option<StoredSpan>>;

    async fn spans(&self, sensor: Option<&str>) -> Result<Vec<StoredSpan>>;

    /// Persist progress, then spans, then coverage in one durable write
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Delete progress, spans and coverage (all sensors when `None`)
    async fn reset(&self, sensor: Option<&str>) -> Result<ResetSummary>;

    async fn snapshot(&self) -> Result<StoreSnapshot>;

    /// Load a snapshot into an empty store
    async fn restore(&self, snapshot: &StoreSnapshot) -> Result<()>;
}

/// Union of stored and incoming coverage.
///
/// Coverage never shrinks: an incoming interval starting where a stored one
/// starts but ending earlier is logged and the union is kept.
pub fn merge_coverage(key: &SpanKey, stored: &IntervalSet, incoming: &IntervalSet) -> IntervalSet {
    let tolerance = stored.tolerance().max(incoming.tolerance());
    for new in incoming {
        let shrunk = stored.iter().find(|old| {
            let drift = new.lower() - old.lower();
            drift <= tolerance && -drift <= tolerance && new.upper() < old.upper()
        });
        if let Some(old) = shrunk {
            log::warn!(
                "Coverage for {} would shrink: stored [{}, {}) reported as [{}, {}); keeping the union",
                key,
                old.lower(),
                old.upper(),
                new.lower(),
                new.upper()
            );
        }
    }
    stored.union(incoming)
}

fn ranges_to_set<I>(ranges: I, tolerance: Duration) -> IntervalSet
where
    I: IntoIterator<Item = (Timestamp, Timestamp)>,
{
    IntervalSet::from_intervals(
        ranges
            .into_iter()
            .filter_map(|(begin, end)| Interval::new(begin, end).ok()),
        tolerance,
    )
}

fn stored_from_record(r: &SpanRecord) -> Result<StoredSpan> {
    Ok(StoredSpan {
        id: r.id,
        span: CertifiedSpan {
            sensor: r.sensor.clone(),
            interval: Interval::new(r.begin, r.end)?,
            lat: r.lat,
            lon: r.lon,
        },
    })
}

/// Filesystem-based storage backend: one versioned state file, rewritten
/// atomically on every change
pub struct FilesystemBackend {
    path: PathBuf,
    format: StateFormat,
    tolerance: Duration,
    lock: tokio::sync::Mutex<()>,
}

impl FilesystemBackend {
    pub fn new(config: &FilesystemConfig, tolerance: Duration) -> Self {
        Self::from_path(config.state_path.clone(), config.format, tolerance)
    }

    pub fn from_path(path: impl Into<PathBuf>, format: StateFormat, tolerance: Duration) -> Self {
        Self {
            path: path.into(),
            format,
            tolerance,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load(&self) -> Result<StatePayload> {
        let state = StateReader::read(&self.path, self.format)
            .with_context(|| format!("Failed to load state file {}", self.path.display()))?;
        Ok(state.map(|s| s.payload).unwrap_or_default())
    }

    fn store(&self, payload: StatePayload) -> Result<()> {
        payload.validate()?;
        let state = StateFile::new(payload)?;
        StateWriter::new(self.format)
            .write(&self.path, &state)
            .with_context(|| format!("Failed to write state file {}", self.path.display()))
    }

    fn coverage_of(&self, payload: &StatePayload, key: &SpanKey) -> IntervalSet {
        payload
            .coverage
            .iter()
            .find(|c| c.sensor == key.sensor && c.extension == key.extension)
            .map(|c| ranges_to_set(c.ranges.iter().map(|r| (r.begin, r.end)), self.tolerance))
            .unwrap_or_else(|| IntervalSet::empty(self.tolerance))
    }

    fn merge_into(&self, payload: &mut StatePayload, key: &SpanKey, incoming: &IntervalSet) -> IntervalSet {
        let stored = self.coverage_of(payload, key);
        let merged = merge_coverage(key, &stored, incoming);
        let ranges = merged
            .iter()
            .map(|iv| RangeRecord {
                begin: iv.lower(),
                end: iv.upper(),
            })
            .collect();

        payload
            .coverage
            .retain(|c| !(c.sensor == key.sensor && c.extension == key.extension));
        payload.coverage.push(CoverageRecord {
            sensor: key.sensor.clone(),
            extension: key.extension.clone(),
            ranges,
        });
        payload
            .coverage
            .sort_by(|a, b| (&a.sensor, &a.extension).cmp(&(&b.sensor, &b.extension)));
        merged
    }

    fn push_span(payload: &mut StatePayload, span: &CertifiedSpan) -> i64 {
        let id = payload.next_span_id();
        payload.spans.push(SpanRecord {
            id,
            sensor: span.sensor.clone(),
            begin: span.interval.lower(),
            end: span.interval.upper(),
            lat: span.lat,
            lon: span.lon,
        });
        id
    }
}

#[async_trait]
impl SpanStore for FilesystemBackend {
    async fn get(&self, key: &SpanKey) -> Result<IntervalSet> {
        let _guard = self.lock.lock().await;
        let payload = self.load()?;
        Ok(self.coverage_of(&payload, key))
    }

    async fn merge(&self, key: &SpanKey, intervals: &IntervalSet) -> Result<IntervalSet> {
        let _guard = self.lock.lock().await;
        let mut payload = self.load()?;
        let merged = self.merge_into(&mut payload, key, intervals);
        self.store(payload)?;
        Ok(merged)
    }
}

#[async_trait]
impl CertificationStore for FilesystemBackend {
    async fn load_progress(&self) -> Result<CertificationProgress> {
        let _guard = self.lock.lock().await;
        let payload = self.load()?;
        Ok(payload
            .progress
            .into_iter()
            .map(|p| ((p.sensor, p.begin), p.certified_end))
            .collect())
    }

    async fn last_span(&self, sensor: &str) -> Result<Option<StoredSpan>> {
        let _guard = self.lock.lock().await;
        let payload = self.load()?;
        payload
            .spans
            .iter()
            .filter(|s| s.sensor == sensor)
            .max_by_key(|s| (s.end, s.id))
            .map(stored_from_record)
            .transpose()
    }

    async fn spans(&self, sensor: Option<&str>) -> Result<Vec<StoredSpan>> {
        let _guard = self.lock.lock().await;
        let payload = self.load()?;
        let mut spans = payload
            .spans
            .iter()
            .filter(|s| sensor.map_or(true, |wanted| s.sensor == wanted))
            .map(stored_from_record)
            .collect::<Result<Vec<_>>>()?;
        spans.sort_by(|a, b| {
            (&a.span.sensor, a.span.interval.lower(), a.id)
                .cmp(&(&b.span.sensor, b.span.interval.lower(), b.id))
        });
        Ok(spans)
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut payload = self.load()?;

        match payload
            .progress
            .iter_mut()
            .find(|p| p.sensor == checkpoint.sensor && p.begin == checkpoint.begin)
        {
            Some(entry) => entry.certified_end = checkpoint.certified_end,
            None => payload.progress.push(ProgressRecord {
                sensor: checkpoint.sensor.clone(),
                begin: checkpoint.begin,
                certified_end: checkpoint.certified_end,
            }),
        }
        payload
            .progress
            .sort_by(|a, b| (&a.sensor, a.begin).cmp(&(&b.sensor, b.begin)));

        if let Some(extended) = &checkpoint.extended {
            let record = payload
                .spans
                .iter_mut()
                .find(|s| s.id == extended.id)
                .ok_or_else(|| anyhow::anyhow!("Certified span {} not found", extended.id))?;
            record.begin = extended.span.interval.lower();
            record.end = extended.span.interval.upper();
        }
        for span in &checkpoint.inserted {
            Self::push_span(&mut payload, span);
        }

        self.merge_into(&mut payload, &checkpoint.key, &checkpoint.coverage);
        self.store(payload)
    }

    async fn reset(&self, sensor: Option<&str>) -> Result<ResetSummary> {
        let _guard = self.lock.lock().await;
        match sensor {
            None => {
                let summary = match self.load() {
                    Ok(payload) => ResetSummary {
                        progress: payload.progress.len() as u64,
                        spans: payload.spans.len() as u64,
                        coverage: payload.coverage.len() as u64,
                    },
                    Err(e) => {
                        log::warn!("Removing unreadable state file: {:#}", e);
                        ResetSummary::default()
                    }
                };
                StateWriter::remove(&self.path)?;
                Ok(summary)
            }
            Some(sensor) => {
                let mut payload = self.load().context(
                    "State file cannot be reset per sensor while unreadable; reset all sensors",
                )?;
                let before = (payload.progress.len(), payload.spans.len(), payload.coverage.len());
                payload.progress.retain(|p| p.sensor != sensor);
                payload.spans.retain(|s| s.sensor != sensor);
                payload.coverage.retain(|c| c.sensor != sensor);
                let summary = ResetSummary {
                    progress: (before.0 - payload.progress.len()) as u64,
                    spans: (before.1 - payload.spans.len()) as u64,
                    coverage: (before.2 - payload.coverage.len()) as u64,
                };
                self.store(payload)?;
                Ok(summary)
            }
        }
    }

    async fn snapshot(&self) -> Result<StoreSnapshot> {
        let _guard = self.lock.lock().await;
        let payload = self.load()?;
        Ok(StoreSnapshot {
            progress: payload
                .progress
                .iter()
                .map(|p| ((p.sensor.clone(), p.begin), p.certified_end))
                .collect(),
            spans: payload
                .spans
                .iter()
                .map(stored_from_record)
                .collect::<Result<_>>()?,
            coverage: payload
                .coverage
                .iter()
                .map(|c| {
                    (
                        SpanKey::new(c.sensor.clone(), c.extension.clone()),
                        ranges_to_set(c.ranges.iter().map(|r| (r.begin, r.end)), self.tolerance),
                    )
                })
                .collect(),
        })
    }

    async fn restore(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut payload = self.load()?;
        if !payload.progress.is_empty() || !payload.spans.is_empty() {
            anyhow::bail!("Refusing to restore into non-empty state file {}", self.path.display());
        }
        payload.progress = snapshot
            .progress
            .iter()
            .map(|((sensor, begin), end)| ProgressRecord {
                sensor: sensor.clone(),
                begin: *begin,
                certified_end: *end,
            })
            .collect();
        for stored in &snapshot.spans {
            Self::push_span(&mut payload, &stored.span);
        }
        for (key, set) in &snapshot.coverage {
            self.merge_into(&mut payload, key, set);
        }
        self.store(payload)
    }
}

/// PostgreSQL-based storage backend
pub struct PostgresqlBackend {
    pool: deadpool_postgres::Pool,
    tolerance: Duration,
}

impl PostgresqlBackend {
    /// Create a new PostgreSQL backend
    pub async fn new(config: &PostgresqlConfig, tolerance: Duration) -> Result<Self> {
        let pool = tehom_db::create_pool(&tehom_db::PoolSettings {
            host: &config.host,
            port: config.port,
            database: &config.database,
            user: &config.user,
            password: &config.password,
            max_connections: config.max_connections,
        })?;

        tehom_db::test_connection(&pool).await?;
        tehom_db::ensure_schema(&pool).await?;

        Ok(Self { pool, tolerance })
    }

    pub fn from_pool(pool: deadpool_postgres::Pool, tolerance: Duration) -> Self {
        Self { pool, tolerance }
    }

    pub fn pool(&self) -> &deadpool_postgres::Pool {
        &self.pool
    }

    fn to_ranges(set: &IntervalSet) -> Vec<tehom_db::CoverageRange> {
        set.iter()
            .map(|iv| tehom_db::CoverageRange {
                begin_at: iv.lower(),
                end_at: iv.upper(),
            })
            .collect()
    }

    /// Lock, read, union and replace one coverage set inside `tx`
    async fn merge_in<C>(&self, tx: &C, key: &SpanKey, incoming: &IntervalSet) -> Result<IntervalSet>
    where
        C: tokio_postgres::GenericClient + Sync,
    {
        tehom_db::lock_coverage(tx, &key.sensor, &key.extension).await?;
        let stored = tehom_db::get_coverage(tx, &key.sensor, &key.extension).await?;
        let stored = ranges_to_set(stored.iter().map(|r| (r.begin_at, r.end_at)), self.tolerance);
        let merged = merge_coverage(key, &stored, incoming);
        tehom_db::replace_coverage(tx, &key.sensor, &key.extension, &Self::to_ranges(&merged)).await?;
        Ok(merged)
    }

    fn new_span(span: &CertifiedSpan) -> tehom_db::NewCertifiedSpan {
        tehom_db::NewCertifiedSpan {
            sensor: span.sensor.clone(),
            begin_at: span.interval.lower(),
            end_at: span.interval.upper(),
            lat: span.lat,
            lon: span.lon,
        }
    }
}

fn stored_from_row(r: &tehom_db::SpanRow) -> Result<StoredSpan> {
    Ok(StoredSpan {
        id: r.id,
        span: CertifiedSpan {
            sensor: r.sensor.clone(),
            interval: Interval::new(r.begin_at, r.end_at)
                .with_context(|| format!("Certified span {} is empty", r.id))?,
            lat: r.lat,
            lon: r.lon,
        },
    })
}

#[async_trait]
impl SpanStore for PostgresqlBackend {
    async fn get(&self, key: &SpanKey) -> Result<IntervalSet> {
        let client = self.pool.get().await?;
        let ranges = tehom_db::get_coverage(&**client, &key.sensor, &key.extension).await?;
        Ok(ranges_to_set(ranges.iter().map(|r| (r.begin_at, r.end_at)), self.tolerance))
    }

    async fn merge(&self, key: &SpanKey, intervals: &IntervalSet) -> Result<IntervalSet> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let merged = self.merge_in(&*tx, key, intervals).await?;
        tx.commit().await.context("Failed to commit coverage merge")?;
        Ok(merged)
    }
}

#[async_trait]
impl CertificationStore for PostgresqlBackend {
    async fn load_progress(&self) -> Result<CertificationProgress> {
        let client = self.pool.get().await?;
        let entries = tehom_db::get_all_progress(&**client).await?;
        Ok(entries
            .into_iter()
            .map(|e| ((e.sensor, e.begin_at), e.certified_end))
            .collect())
    }

    async fn last_span(&self, sensor: &str) -> Result<Option<StoredSpan>> {
        let client = self.pool.get().await?;
        tehom_db::get_last_span(&**client, sensor)
            .await?
            .as_ref()
            .map(stored_from_row)
            .transpose()
    }

    async fn spans(&self, sensor: Option<&str>) -> Result<Vec<StoredSpan>> {
        let client = self.pool.get().await?;
        tehom_db::get_spans(&**client, sensor)
            .await?
            .iter()
            .map(stored_from_row)
            .collect()
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tehom_db::upsert_progress(
            &*tx,
            &tehom_db::NewProgress {
                sensor: checkpoint.sensor.clone(),
                begin_at: checkpoint.begin,
                certified_end: checkpoint.certified_end,
            },
        )
        .await?;

        if let Some(extended) = &checkpoint.extended {
            tehom_db::update_span_bounds(
                &*tx,
                extended.id,
                extended.span.interval.lower(),
                extended.span.interval.upper(),
            )
            .await?;
        }
        for span in &checkpoint.inserted {
            tehom_db::insert_span(&*tx, &Self::new_span(span)).await?;
        }

        self.merge_in(&*tx, &checkpoint.key, &checkpoint.coverage).await?;

        tx.commit().await.context("Failed to commit checkpoint")?;
        Ok(())
    }

    async fn reset(&self, sensor: Option<&str>) -> Result<ResetSummary> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let summary = ResetSummary {
            progress: tehom_db::delete_progress(&*tx, sensor).await?,
            spans: tehom_db::delete_spans(&*tx, sensor).await?,
            coverage: tehom_db::delete_coverage(&*tx, sensor).await?,
        };
        tx.commit().await.context("Failed to commit reset")?;
        Ok(summary)
    }

    async fn snapshot(&self) -> Result<StoreSnapshot> {
        let progress = self.load_progress().await?;
        let spans = self.spans(None).await?;
        let client = self.pool.get().await?;

        let mut coverage = Vec::new();
        for (sensor, extension) in tehom_db::get_coverage_keys(&**client).await? {
            let ranges = tehom_db::get_coverage(&**client, &sensor, &extension).await?;
            coverage.push((
                SpanKey::new(sensor, extension),
                ranges_to_set(ranges.iter().map(|r| (r.begin_at, r.end_at)), self.tolerance),
            ));
        }

        Ok(StoreSnapshot {
            progress,
            spans,
            coverage,
        })
    }

    async fn restore(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        if !tehom_db::get_all_progress(&*tx).await?.is_empty()
            || !tehom_db::get_spans(&*tx, None).await?.is_empty()
        {
            anyhow::bail!("Refusing to restore into a non-empty database");
        }

        for ((sensor, begin), end) in &snapshot.progress {
            tehom_db::upsert_progress(
                &*tx,
                &tehom_db::NewProgress {
                    sensor: sensor.clone(),
                    begin_at: *begin,
                    certified_end: *end,
                },
            )
            .await?;
        }
        for stored in &snapshot.spans {
            tehom_db::insert_span(&*tx, &Self::new_span(&stored.span)).await?;
        }
        for (key, set) in &snapshot.coverage {
            self.merge_in(&*tx, key, set).await?;
        }

        tx.commit().await.context("Failed to commit restore")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::default_tolerance;
    use chrono::{TimeZone, Utc};
    use tehom_state::StateError;
    use tempfile::TempDir;

    fn t(min: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn iv(a: i64, b: i64) -> Interval {
        Interval::new(t(a), t(b)).unwrap()
    }

    fn set(ivs: &[(i64, i64)]) -> IntervalSet {
        IntervalSet::from_intervals(ivs.iter().map(|&(a, b)| iv(a, b)), default_tolerance())
    }

    fn backend(dir: &TempDir, name: &str) -> FilesystemBackend {
        FilesystemBackend::from_path(dir.path().join(name), StateFormat::Auto, default_tolerance())
    }

    fn span(sensor: &str, a: i64, b: i64) -> CertifiedSpan {
        CertifiedSpan {
            sensor: sensor.into(),
            interval: iv(a, b),
            lat: 48.5,
            lon: -123.4,
        }
    }

    fn checkpoint(sensor: &str, end: i64, inserted: Vec<CertifiedSpan>) -> Checkpoint {
        let coverage = IntervalSet::from_intervals(inserted.iter().map(|s| s.interval), default_tolerance());
        Checkpoint {
            sensor: sensor.into(),
            begin: t(0),
            certified_end: t(end),
            extended: None,
            inserted,
            key: SpanKey::new(sensor, "mp3"),
            coverage,
        }
    }

    #[tokio::test]
    async fn test_missing_state_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = backend(&dir, "state.json");
        assert!(store.load_progress().await.unwrap().is_empty());
        assert!(store.get(&SpanKey::new("H1", "mp3")).await.unwrap().is_empty());
        assert!(store.last_span("H1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = backend(&dir, "state.json");
        let key = SpanKey::new("H1", "mp3");

        let first = store.merge(&key, &set(&[(0, 30)])).await.unwrap();
        // A shorter report for the same start is flagged but cannot shrink coverage
        let second = store.merge(&key, &set(&[(0, 10), (60, 70)])).await.unwrap();
        assert!(second.total_duration() >= first.total_duration());
        assert_eq!(second.as_slice(), &[iv(0, 30), iv(60, 70)]);
        assert_eq!(store.get(&key).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_commit_and_extend_last_span() {
        let dir = TempDir::new().unwrap();
        let store = backend(&dir, "state.bson");

        store
            .commit(&checkpoint("H1", 30, vec![span("H1", 0, 15), span("H1", 20, 30)]))
            .await
            .unwrap();
        let last = store.last_span("H1").await.unwrap().unwrap();
        assert_eq!(last.span.interval, iv(20, 30));

        let mut cp = checkpoint("H1", 45, vec![]);
        cp.extended = Some(StoredSpan {
            id: last.id,
            span: span("H1", 20, 45),
        });
        cp.coverage = set(&[(30, 45)]);
        store.commit(&cp).await.unwrap();

        let spans = store.spans(Some("H1")).await.unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].span.interval, iv(20, 45));
        assert_eq!(store.load_progress().await.unwrap()[&("H1".to_string(), t(0))], t(45));
        assert_eq!(
            store.get(&SpanKey::new("H1", "mp3")).await.unwrap().as_slice(),
            &[iv(0, 15), iv(20, 45)]
        );
    }

    #[tokio::test]
    async fn test_reset_single_sensor_and_all() {
        let dir = TempDir::new().unwrap();
        let store = backend(&dir, "state.json");
        store.commit(&checkpoint("H1", 15, vec![span("H1", 0, 15)])).await.unwrap();
        store.commit(&checkpoint("H2", 15, vec![span("H2", 0, 15)])).await.unwrap();

        let summary = store.reset(Some("H1")).await.unwrap();
        assert_eq!(summary, ResetSummary { progress: 1, spans: 1, coverage: 1 });
        assert_eq!(store.spans(None).await.unwrap().len(), 1);

        store.reset(None).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported_as_state_error() {
        let dir = TempDir::new().unwrap();
        let store = backend(&dir, "state.json");
        store.commit(&checkpoint("H1", 15, vec![span("H1", 0, 15)])).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        std::fs::write(store.path(), text.replace("48.5", "47.5")).unwrap();

        let err = store.load_progress().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StateError>(),
            Some(StateError::ChecksumMismatch { .. })
        ));

        // Operator reset still clears an unreadable file
        store.reset(None).await.unwrap();
        assert!(store.load_progress().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let dir = TempDir::new().unwrap();
        let source = backend(&dir, "a.json");
        source
            .commit(&checkpoint("H1", 30, vec![span("H1", 0, 15), span("H1", 20, 30)]))
            .await
            .unwrap();

        let target = backend(&dir, "b.bson");
        let snapshot = source.snapshot().await.unwrap();
        target.restore(&snapshot).await.unwrap();

        assert_eq!(target.load_progress().await.unwrap(), source.load_progress().await.unwrap());
        assert_eq!(target.spans(None).await.unwrap(), source.spans(None).await.unwrap());
        assert!(target.restore(&snapshot).await.is_err());
    }

    #[test]
    fn test_merge_coverage_keeps_union() {
        let key = SpanKey::new("H1", "mp3");
        let merged = merge_coverage(&key, &set(&[(0, 30)]), &set(&[(0, 10)]));
        assert_eq!(merged.as_slice(), &[iv(0, 30)]);
    }
}
