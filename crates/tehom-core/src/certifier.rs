//! Availability certification
//!
//! Deployment metadata says when a sensor *should* have recorded; the
//! catalog says which files actually exist. The certifier diffs the
//! deployment list against stored progress, scans the catalog for whatever
//! is not yet certified, and commits one checkpoint per deployment record.

use chrono::Duration;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use tehom_state::StateError;

use crate::catalog::{list_all, Catalog, CatalogError, RetryPolicy};
use crate::config::CertificationConfig;
use crate::deployment::{same_position, DeploymentRecord};
use crate::filename::{file_interval, has_extension};
use crate::interval::{Interval, IntervalSet, Timestamp};
use crate::storage_backend::{
    CertificationProgress, CertificationStore, CertifiedSpan, Checkpoint, SpanKey, StoredSpan,
};

#[derive(Debug, Error)]
pub enum CertifyError {
    #[error("catalog failure while certifying {sensor}: {source}")]
    Catalog {
        sensor: String,
        #[source]
        source: CatalogError,
    },

    #[error("certification state is corrupt ({0}); run tehom-reset before certifying again")]
    CorruptState(String),

    #[error(transparent)]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for CertifyError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<StateError>() {
            Some(StateError::Io { .. }) | None => CertifyError::Storage(e),
            Some(_) => CertifyError::CorruptState(format!("{:#}", e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Nothing certified yet for this deployment
    Full,
    /// Continue from the previously certified end
    Resume,
}

/// A deployment record that still needs catalog work
#[derive(Debug, Clone, PartialEq)]
pub struct PendingScan {
    pub sensor: String,
    /// Deployment begin, the key progress is stored under
    pub deployment_begin: Timestamp,
    pub range: Interval,
    pub lat: f64,
    pub lon: f64,
    pub kind: ScanKind,
}

/// Work left after comparing deployments with stored progress.
///
/// Open ends resolve to `process_start`. Deployments whose resolved end
/// matches the stored progress are dropped; partially certified ones resume
/// from the stored end. Output is ordered by sensor then begin.
pub fn diff_deployments(
    deployments: &[DeploymentRecord],
    progress: &CertificationProgress,
    process_start: Timestamp,
) -> Vec<PendingScan> {
    let mut ordered: Vec<&DeploymentRecord> = deployments.iter().collect();
    ordered.sort_by(|a, b| (&a.sensor, a.begin).cmp(&(&b.sensor, b.begin)));

    let mut pending = Vec::new();
    for d in ordered {
        let end = d.resolved_end(process_start);
        let (lower, kind) = match progress.get(&(d.sensor.clone(), d.begin)) {
            Some(&certified) if certified == end => continue,
            Some(&certified) => (certified, ScanKind::Resume),
            None => (d.begin, ScanKind::Full),
        };

        match Interval::new(lower, end) {
            Ok(range) => pending.push(PendingScan {
                sensor: d.sensor.clone(),
                deployment_begin: d.begin,
                range,
                lat: d.lat,
                lon: d.lon,
                kind,
            }),
            Err(_) => log::warn!(
                "Skipping {} deployment at {}: certified end {} is not before {}",
                d.sensor,
                d.begin,
                lower,
                end
            ),
        }
    }
    pending
}

/// Turn catalog filenames into merged spans.
///
/// Each file covers `file_duration` from the timestamp in its name. Files
/// without a parseable timestamp or with the wrong extension are dropped
/// and counted.
pub fn spans_from_filenames(
    sensor: &str,
    filenames: &[String],
    extension: &str,
    file_duration: Duration,
    tolerance: Duration,
) -> (IntervalSet, usize) {
    let mut dropped = 0;
    let mut intervals = Vec::with_capacity(filenames.len());
    for name in filenames {
        let interval = has_extension(name, extension)
            .then(|| file_interval(name, file_duration))
            .flatten();
        match interval {
            Some(iv) => intervals.push(iv),
            None => {
                log::warn!("Dropping malformed catalog file for {}: {}", sensor, name);
                dropped += 1;
            }
        }
    }
    (IntervalSet::from_intervals(intervals, tolerance), dropped)
}

/// Span rows to write for a freshly scanned set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub extended: Option<StoredSpan>,
    pub inserted: Vec<CertifiedSpan>,
    /// Scanned spans reaching before the span they follow
    pub conflicts: Vec<Interval>,
}

enum Tail {
    Stored(StoredSpan),
    Inserted(usize),
}

/// Fold new spans onto the most recent stored span for the sensor.
///
/// A span touching the running tail (within `tolerance`) at the same
/// position extends it instead of creating a row. A span that starts before
/// the tail, or ends before the tail begins, indicates an inconsistent scan
/// order; it is logged and listed in `conflicts`.
pub fn reconcile(
    sensor: &str,
    last: Option<StoredSpan>,
    spans: &IntervalSet,
    lat: f64,
    lon: f64,
    tolerance: Duration,
) -> Reconciled {
    let mut out = Reconciled::default();
    let mut tail = last.map(Tail::Stored);

    for iv in spans {
        let current = match &tail {
            Some(Tail::Stored(s)) => Some(&s.span),
            Some(Tail::Inserted(i)) => out.inserted.get(*i),
            None => None,
        };

        let Some(current) = current else {
            out.inserted.push(CertifiedSpan {
                sensor: sensor.to_string(),
                interval: *iv,
                lat,
                lon,
            });
            tail = Some(Tail::Inserted(out.inserted.len() - 1));
            continue;
        };

        let prev = current.interval;
        let touches = iv.lower() <= prev.upper() + tolerance && iv.upper() + tolerance >= prev.lower();
        let positioned = same_position(current.lat, current.lon, lat, lon);

        if iv.upper() < prev.lower() || (touches && iv.lower() < prev.lower()) {
            log::warn!(
                "Conflicting span for {}: [{}, {}) reaches before stored span [{}, {})",
                sensor,
                iv.lower(),
                iv.upper(),
                prev.lower(),
                prev.upper()
            );
            out.conflicts.push(*iv);
        }

        if touches && positioned {
            let merged = Interval::new(prev.lower().min(iv.lower()), prev.upper().max(iv.upper()))
                .unwrap_or(prev);
            match &mut tail {
                Some(Tail::Stored(s)) if merged != s.span.interval => {
                    s.span.interval = merged;
                    out.extended = Some(s.clone());
                }
                Some(Tail::Stored(_)) => {}
                Some(Tail::Inserted(i)) => {
                    if let Some(span) = out.inserted.get_mut(*i) {
                        span.interval = merged;
                    }
                }
                None => {}
            }
            continue;
        }

        if touches {
            log::warn!(
                "Span for {} at [{}, {}) touches a span recorded at a different position; storing separately",
                sensor,
                iv.lower(),
                iv.upper()
            );
        }
        out.inserted.push(CertifiedSpan {
            sensor: sensor.to_string(),
            interval: *iv,
            lat,
            lon,
        });
        tail = Some(Tail::Inserted(out.inserted.len() - 1));
    }

    out
}

/// Counts from one certification run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertifyReport {
    pub deployments: usize,
    pub skipped: usize,
    pub scanned: usize,
    pub resumed: usize,
    pub files: usize,
    pub dropped_files: usize,
    pub spans_inserted: usize,
    pub spans_extended: usize,
    pub span_conflicts: usize,
    pub interrupted: bool,
}

/// Resumable catalog scanner
pub struct Certifier<'a> {
    catalog: &'a dyn Catalog,
    store: &'a dyn CertificationStore,
    config: CertificationConfig,
    retry: RetryPolicy,
    stop: Arc<AtomicBool>,
}

impl<'a> Certifier<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        store: &'a dyn CertificationStore,
        config: CertificationConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.max_retries, config.retry_backoff());
        Self {
            catalog,
            store,
            config,
            retry,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an external stop flag, checked between deployment records
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Certify every deployment against the catalog
    pub async fn certify(
        &self,
        deployments: &[DeploymentRecord],
        process_start: Timestamp,
    ) -> Result<CertifyReport, CertifyError> {
        let progress = self.store.load_progress().await?;
        let pending = diff_deployments(deployments, &progress, process_start);

        let mut report = CertifyReport {
            deployments: deployments.len(),
            skipped: deployments.len() - pending.len(),
            ..Default::default()
        };
        log::info!(
            "{} of {} deployment records need certification",
            pending.len(),
            deployments.len()
        );

        for scan in &pending {
            if self.stop.load(Ordering::SeqCst) {
                log::warn!("Certification interrupted before {} at {}", scan.sensor, scan.range.lower());
                report.interrupted = true;
                break;
            }
            self.certify_one(scan, &mut report).await?;
        }

        Ok(report)
    }

    async fn certify_one(&self, scan: &PendingScan, report: &mut CertifyReport) -> Result<(), CertifyError> {
        log::debug!(
            "Certifying {} over [{}, {}) ({:?})",
            scan.sensor,
            scan.range.lower(),
            scan.range.upper(),
            scan.kind
        );

        let filenames = self.list_range(&scan.sensor, &scan.range).await?;
        let tolerance = self.config.merge_tolerance();
        let (spans, dropped) = spans_from_filenames(
            &scan.sensor,
            &filenames,
            &self.config.extension,
            self.config.file_duration(),
            tolerance,
        );

        let last = self.store.last_span(&scan.sensor).await?;
        let reconciled = reconcile(&scan.sensor, last, &spans, scan.lat, scan.lon, tolerance);

        let checkpoint = Checkpoint {
            sensor: scan.sensor.clone(),
            begin: scan.deployment_begin,
            certified_end: scan.range.upper(),
            extended: reconciled.extended.clone(),
            inserted: reconciled.inserted.clone(),
            key: SpanKey::new(scan.sensor.clone(), self.config.extension.clone()),
            coverage: spans,
        };
        self.store.commit(&checkpoint).await?;

        report.scanned += 1;
        if scan.kind == ScanKind::Resume {
            report.resumed += 1;
        }
        report.files += filenames.len();
        report.dropped_files += dropped;
        report.spans_inserted += reconciled.inserted.len();
        report.spans_extended += usize::from(reconciled.extended.is_some());
        report.span_conflicts += reconciled.conflicts.len();

        log::info!(
            "Certified {} through {}: {} files, {} new spans{}",
            scan.sensor,
            scan.range.upper(),
            filenames.len(),
            reconciled.inserted.len(),
            if reconciled.extended.is_some() { ", last span extended" } else { "" }
        );
        Ok(())
    }

    /// List files for a range, halving it whenever the catalog rejects the
    /// request as malformed
    async fn list_range(&self, sensor: &str, range: &Interval) -> Result<Vec<String>, CertifyError> {
        let min_split = self.config.min_split();
        let mut stack = vec![*range];
        let mut files = Vec::new();

        while let Some(part) = stack.pop() {
            let listed = list_all(
                self.catalog,
                sensor,
                &part,
                &self.config.extension,
                self.config.page_size,
                &self.retry,
            )
            .await;
            match listed {
                Ok(found) => files.extend(found),
                Err(CatalogError::NotFound(what)) => {
                    log::info!("Catalog has nothing for {} over [{}, {})", what, part.lower(), part.upper());
                }
                Err(CatalogError::MalformedRequest(msg)) if part.duration() > min_split => {
                    let mid = part.lower() + part.duration() / 2;
                    log::debug!("Splitting [{}, {}) at {}: {}", part.lower(), part.upper(), mid, msg);
                    if let (Ok(first), Ok(second)) =
                        (Interval::new(part.lower(), mid), Interval::new(mid, part.upper()))
                    {
                        stack.push(second);
                        stack.push(first);
                    }
                }
                Err(source) => {
                    return Err(CertifyError::Catalog {
                        sensor: sensor.to_string(),
                        source,
                    })
                }
            }
        }

        // Files straddling a split point are listed twice
        files.sort();
        files.dedup();
        Ok(files)
    }
}
