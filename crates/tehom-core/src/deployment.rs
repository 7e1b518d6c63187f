//! Sensor deployments
//!
//! A deployment is a span during which a sensor sat at one fixed position.
//! Sensors are only moved between deployments.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::interval::{Interval, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub sensor: String,
    pub begin: Timestamp,
    /// `None` while the deployment is still active
    pub end: Option<Timestamp>,
    pub lat: f64,
    pub lon: f64,
}

impl DeploymentRecord {
    /// End of the deployment, with an open end pinned to `process_start`
    pub fn resolved_end(&self, process_start: Timestamp) -> Timestamp {
        self.end.unwrap_or(process_start)
    }

    /// Part of `window` covered by this deployment
    pub fn clip(&self, window: &Interval) -> Option<Interval> {
        let lower = self.begin.max(window.lower());
        let upper = match self.end {
            Some(end) => end.min(window.upper()),
            None => window.upper(),
        };
        Interval::new(lower, upper).ok()
    }
}

/// Positions equal to within about a millimetre
pub fn same_position(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> bool {
    (lat_a - lat_b).abs() < 1e-8 && (lon_a - lon_b).abs() < 1e-8
}

/// Load deployment records from a JSON array
pub fn load_deployments(path: &Path) -> anyhow::Result<Vec<DeploymentRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read deployments file {}", path.display()))?;
    let deployments: Vec<DeploymentRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse deployments file {}", path.display()))?;

    for d in &deployments {
        if let Some(end) = d.end {
            if end <= d.begin {
                anyhow::bail!("Deployment of {} at {} ends before it begins", d.sensor, d.begin);
            }
        }
    }

    Ok(deployments)
}
