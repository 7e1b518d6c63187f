//! Joint availability of vessel tracking and certified audio
//!
//! A sensor's position is fixed within a deployment, so the query window is
//! split into one sub-window per deployment and each is resolved on its
//! own. Vessel coverage is looked up around the sensor's position for that
//! sub-window.

use anyhow::Result;
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::deployment::{same_position, DeploymentRecord};
use crate::interval::{Interval, IntervalSet};
use crate::storage_backend::{SpanKey, SpanStore};
use crate::vessel::{GeoBox, VesselSource};

/// Part of a sensor's coverage recorded at one position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageSegment {
    pub interval: Interval,
    pub lat: f64,
    pub lon: f64,
}

/// Time a sensor has both vessel tracking and certified audio
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorCoverage {
    pub sensor: String,
    pub intervals: IntervalSet,
    /// The same time as `intervals`, split where the sensor moved
    pub segments: Vec<CoverageSegment>,
    /// Merged intervals spanning more than one sensor position
    pub ambiguous: Vec<Interval>,
}

pub struct OverlapResolver<'a> {
    vessels: &'a dyn VesselSource,
    audio: &'a dyn SpanStore,
    deployments: &'a [DeploymentRecord],
    extension: String,
    radius_deg: f64,
    tolerance: Duration,
}

impl<'a> OverlapResolver<'a> {
    pub fn new(
        vessels: &'a dyn VesselSource,
        audio: &'a dyn SpanStore,
        deployments: &'a [DeploymentRecord],
        extension: impl Into<String>,
        radius_deg: f64,
        tolerance: Duration,
    ) -> Self {
        Self {
            vessels,
            audio,
            deployments,
            extension: extension.into(),
            radius_deg,
            tolerance,
        }
    }

    /// Coverage for every sensor over `window`, skipping deployments
    /// positioned outside `area`
    pub async fn resolve(
        &self,
        sensors: &[String],
        window: &Interval,
        area: &GeoBox,
    ) -> Result<BTreeMap<String, SensorCoverage>> {
        let mut out = BTreeMap::new();
        for sensor in sensors {
            let coverage = self.resolve_sensor(sensor, window, area).await?;
            log::debug!(
                "{}: {} of joint coverage in {} interval(s)",
                sensor,
                coverage.intervals.total_duration(),
                coverage.intervals.len()
            );
            out.insert(sensor.clone(), coverage);
        }
        Ok(out)
    }

    async fn resolve_sensor(&self, sensor: &str, window: &Interval, area: &GeoBox) -> Result<SensorCoverage> {
        let mut deployments: Vec<&DeploymentRecord> =
            self.deployments.iter().filter(|d| d.sensor == sensor).collect();
        deployments.sort_by_key(|d| d.begin);

        let audio = self
            .audio
            .get(&SpanKey::new(sensor, self.extension.clone()))
            .await?
            .clip(window);

        let mut segments = Vec::new();
        for d in deployments {
            let Some(sub) = d.clip(window) else {
                continue;
            };
            if !area.contains(d.lat, d.lon) {
                log::debug!(
                    "{} at ({}, {}) lies outside the query area for [{}, {})",
                    sensor,
                    d.lat,
                    d.lon,
                    sub.lower(),
                    sub.upper()
                );
                continue;
            }

            let around = GeoBox::around(d.lat, d.lon, self.radius_deg);
            let vessel = self.vessels.coverage(&around, &sub).await?.clip(&sub);
            let joint = vessel.intersect(&audio.clip(&sub));

            segments.extend(joint.iter().map(|iv| CoverageSegment {
                interval: *iv,
                lat: d.lat,
                lon: d.lon,
            }));
        }

        let intervals = IntervalSet::from_intervals(segments.iter().map(|s| s.interval), self.tolerance);
        let ambiguous = ambiguous_intervals(sensor, &intervals, &segments);

        Ok(SensorCoverage {
            sensor: sensor.to_string(),
            intervals,
            segments,
            ambiguous,
        })
    }
}

/// Merged intervals that join segments from different positions, each
/// logged as a warning
fn ambiguous_intervals(sensor: &str, intervals: &IntervalSet, segments: &[CoverageSegment]) -> Vec<Interval> {
    let mut ambiguous = Vec::new();
    for iv in intervals {
        let mut inside = segments
            .iter()
            .filter(|s| iv.lower() <= s.interval.lower() && s.interval.upper() <= iv.upper());
        let Some(first) = inside.next() else {
            continue;
        };
        if inside.any(|s| !same_position(first.lat, first.lon, s.lat, s.lon)) {
            log::warn!(
                "Ambiguous position for {} over [{}, {}): the sensor moved; use the per-position segments",
                sensor,
                iv.lower(),
                iv.upper()
            );
            ambiguous.push(*iv);
        }
    }
    ambiguous
}
