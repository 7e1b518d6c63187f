//! Vessel positions at sample times
//!
//! Rule, per vessel and sample time `t`:
//! - fixes on both sides of `t` within the near threshold: interpolate
//! - otherwise a single fix within the very-near threshold: hold it
//! - otherwise the vessel is left out for `t`

use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::SamplingConfig;
use crate::interval::Timestamp;
use crate::vessel::VesselObservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelMethod {
    Interpolated,
    Held,
}

/// Position assigned to one vessel at one sample time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionLabel {
    pub vessel_id: i64,
    pub time: Timestamp,
    pub lat: f64,
    pub lon: f64,
    pub method: LabelMethod,
}

#[derive(Debug, Clone)]
pub struct PositionInterpolator {
    near: Duration,
    very_near: Duration,
}

impl PositionInterpolator {
    pub fn new(near: Duration, very_near: Duration) -> Self {
        Self { near, very_near }
    }

    pub fn from_config(config: &SamplingConfig) -> Self {
        Self::new(config.near_threshold(), config.very_near_threshold())
    }

    /// Widest distance from a sample at which a fix can matter
    pub fn reach(&self) -> Duration {
        self.near.max(self.very_near)
    }

    /// Position of one vessel at `t` from its time-ordered track
    pub fn position(&self, track: &[VesselObservation], t: Timestamp) -> Option<(f64, f64, LabelMethod)> {
        let after_idx = track.partition_point(|o| o.time < t);
        let before_idx = track.partition_point(|o| o.time <= t);

        let before = before_idx.checked_sub(1).map(|i| &track[i]);
        let after = track.get(after_idx);

        let before_near = before.filter(|o| t - o.time <= self.near);
        let after_near = after.filter(|o| o.time - t <= self.near);

        if let (Some(b), Some(a)) = (before_near, after_near) {
            let (lat, lon) = interpolate(b, a, t);
            return Some((lat, lon, LabelMethod::Interpolated));
        }

        let before_close = before.filter(|o| t - o.time <= self.very_near);
        let after_close = after.filter(|o| o.time - t <= self.very_near);
        let held = match (before_close, after_close) {
            (Some(b), Some(a)) => {
                if t - b.time <= a.time - t {
                    b
                } else {
                    a
                }
            }
            (Some(o), None) | (None, Some(o)) => o,
            (None, None) => return None,
        };
        Some((held.lat, held.lon, LabelMethod::Held))
    }

    /// Labels for every vessel in `observations` at `t`, ordered by vessel
    pub fn label(&self, observations: &[VesselObservation], t: Timestamp) -> Vec<PositionLabel> {
        let mut tracks: BTreeMap<i64, Vec<VesselObservation>> = BTreeMap::new();
        for o in observations {
            tracks.entry(o.vessel_id).or_default().push(o.clone());
        }

        tracks
            .into_iter()
            .filter_map(|(vessel_id, mut track)| {
                track.sort_by_key(|o| o.time);
                self.position(&track, t).map(|(lat, lon, method)| PositionLabel {
                    vessel_id,
                    time: t,
                    lat,
                    lon,
                    method,
                })
            })
            .collect()
    }
}

fn interpolate(before: &VesselObservation, after: &VesselObservation, t: Timestamp) -> (f64, f64) {
    let span = (after.time - before.time).num_milliseconds();
    if span == 0 {
        return (before.lat, before.lon);
    }
    let f = (t - before.time).num_milliseconds() as f64 / span as f64;

    let lat = before.lat + f * (after.lat - before.lat);

    // Take the short way across the antimeridian
    let mut dlon = after.lon - before.lon;
    if dlon > 180.0 {
        dlon -= 360.0;
    } else if dlon < -180.0 {
        dlon += 360.0;
    }
    let mut lon = before.lon + f * dlon;
    if lon >= 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }

    (lat, lon)
}
