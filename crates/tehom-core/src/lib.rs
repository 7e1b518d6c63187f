//! Tehom Core - Temporal Availability & Sampling Engine
//!
//! Reconciles vessel-tracking records with hydrophone recordings. Audio
//! availability is certified against the recording catalog, intersected
//! with vessel-tracking coverage per sensor, and sampled at deterministic
//! times labeled with nearby vessel positions.

pub mod catalog;
pub mod certifier;
pub mod config;
pub mod deployment;
pub mod filename;
pub mod interpolate;
pub mod interval;
pub mod overlap;
pub mod sampling;
pub mod storage_backend;
pub mod storage_config;
pub mod vessel;

use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

pub use catalog::{Catalog, CatalogError, CatalogPage, CatalogRequest, ListingCatalog, RetryPolicy};
pub use certifier::{diff_deployments, Certifier, CertifyError, CertifyReport, PendingScan, ScanKind};
pub use config::{CertificationConfig, SamplingConfig};
pub use deployment::{load_deployments, DeploymentRecord};
pub use interpolate::{LabelMethod, PositionInterpolator, PositionLabel};
pub use interval::{Interval, IntervalSet, Timestamp};
pub use overlap::{CoverageSegment, OverlapResolver, SensorCoverage};
pub use sampling::{schedule_samples, SampleWindow};
pub use storage_backend::{
    CertificationProgress, CertificationStore, CertifiedSpan, FilesystemBackend, PostgresqlBackend,
    SpanKey, SpanStore, StoredSpan,
};
pub use storage_config::{StorageBackendKind, TehomConfig};
pub use vessel::{GeoBox, JsonVesselSource, PostgresqlVesselSource, VesselObservation, VesselSource};

/// Where sampling reads from
pub struct SampleSources<'a> {
    pub vessels: &'a dyn VesselSource,
    pub audio: &'a dyn SpanStore,
    pub deployments: &'a [DeploymentRecord],
}

/// What to sample
#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub sensors: Vec<String>,
    pub window: Interval,
    pub area: GeoBox,
    /// Audio format whose certified coverage is used
    pub extension: String,
}

/// One labeled sample: a vessel's position at a sample time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleLabel {
    pub sensor: String,
    #[serde(flatten)]
    pub position: PositionLabel,
}

/// Everything handed to the downstream consumer
#[derive(Debug, Clone, Serialize)]
pub struct SampleIndex {
    pub coverage: BTreeMap<String, SensorCoverage>,
    pub windows: Vec<SampleWindow>,
    pub labels: Vec<SampleLabel>,
}

/// Resolve joint coverage, schedule samples and label them with vessel
/// positions.
///
/// Output ordering depends only on the inputs: windows by sensor then time,
/// labels by sensor, sample time, then vessel.
pub async fn sample(
    sources: &SampleSources<'_>,
    request: &SampleRequest,
    config: &SamplingConfig,
    tolerance: chrono::Duration,
) -> Result<SampleIndex> {
    config.validate()?;

    let resolver = OverlapResolver::new(
        sources.vessels,
        sources.audio,
        sources.deployments,
        request.extension.clone(),
        config.label_radius_deg,
        tolerance,
    );
    let coverage = resolver
        .resolve(&request.sensors, &request.window, &request.area)
        .await?;

    let windows: Vec<SampleWindow> = coverage
        .values()
        .flat_map(|c| sampling::schedule_coverage(c, config.duration(), config.spacing()))
        .collect();

    let interpolator = PositionInterpolator::from_config(config);
    let reach = interpolator.reach();

    // Tracks per window, padded so fixes just outside a window still bracket
    let mut tracks = Vec::with_capacity(windows.len());
    for w in &windows {
        let around = GeoBox::around(w.lat, w.lon, config.label_radius_deg);
        let lower = w.times.first().copied().unwrap_or(w.interval.lower()) - reach;
        let upper = w.times.last().copied().unwrap_or(w.interval.upper()) + reach + chrono::Duration::milliseconds(1);
        let span = Interval::new(lower, upper)?;
        tracks.push(sources.vessels.observations(&around, &span).await?);
    }

    let mut labels: Vec<SampleLabel> = windows
        .par_iter()
        .zip(tracks.par_iter())
        .flat_map_iter(|(w, observations)| {
            w.times
                .iter()
                .flat_map(|&t| interpolator.label(observations, t))
                .map(|position| SampleLabel {
                    sensor: w.sensor.clone(),
                    position,
                })
                .collect::<Vec<_>>()
        })
        .collect();

    labels.sort_by(|a, b| {
        (&a.sensor, a.position.time, a.position.vessel_id).cmp(&(&b.sensor, b.position.time, b.position.vessel_id))
    });

    log::info!(
        "Sampled {} sensor(s): {} window(s), {} sample time(s), {} label(s)",
        coverage.len(),
        windows.len(),
        windows.iter().map(|w| w.times.len()).sum::<usize>(),
        labels.len()
    );

    Ok(SampleIndex {
        coverage,
        windows,
        labels,
    })
}
