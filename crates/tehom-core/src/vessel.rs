//! Vessel-tracking records
//!
//! Read-only access to downloaded vessel position reports and to the
//! blocks (time range x bounding box) that have been downloaded so far.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::interval::{Interval, IntervalSet, Timestamp};

/// Latitude/longitude rectangle, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl GeoBox {
    pub const WORLD: GeoBox = GeoBox {
        min_lat: -90.0,
        min_lon: -180.0,
        max_lat: 90.0,
        max_lon: 180.0,
    };

    /// Box from its south-west and north-east corners
    pub fn new(bottom_left: (f64, f64), top_right: (f64, f64)) -> anyhow::Result<Self> {
        let b = GeoBox {
            min_lat: bottom_left.0,
            min_lon: bottom_left.1,
            max_lat: top_right.0,
            max_lon: top_right.1,
        };
        if b.min_lat > b.max_lat || b.min_lon > b.max_lon {
            anyhow::bail!("bottom-left corner must lie south-west of top-right corner");
        }
        Ok(b)
    }

    /// Square of half-width `radius_deg` around a point, clamped to the globe
    pub fn around(lat: f64, lon: f64, radius_deg: f64) -> Self {
        GeoBox {
            min_lat: (lat - radius_deg).max(-90.0),
            min_lon: (lon - radius_deg).max(-180.0),
            max_lat: (lat + radius_deg).min(90.0),
            max_lon: (lon + radius_deg).min(180.0),
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn contains_box(&self, other: &GeoBox) -> bool {
        self.min_lat <= other.min_lat
            && self.min_lon <= other.min_lon
            && self.max_lat >= other.max_lat
            && self.max_lon >= other.max_lon
    }
}

/// One position report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselObservation {
    pub vessel_id: i64,
    pub time: Timestamp,
    pub lat: f64,
    pub lon: f64,
}

/// A downloaded block of tracking data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselBlock {
    pub begin: Timestamp,
    pub end: Timestamp,
    pub area: GeoBox,
}

/// Read-only vessel-tracking store
#[async_trait]
pub trait VesselSource: Send + Sync {
    /// Times within `window` for which tracking data covering all of
    /// `area` has been downloaded
    async fn coverage(&self, area: &GeoBox, window: &Interval) -> Result<IntervalSet>;

    /// Position reports inside `area` during `window`, ordered by vessel
    /// then time
    async fn observations(&self, area: &GeoBox, window: &Interval) -> Result<Vec<VesselObservation>>;
}

fn blocks_to_coverage<I>(blocks: I, window: &Interval, tolerance: Duration) -> IntervalSet
where
    I: IntoIterator<Item = (Timestamp, Timestamp)>,
{
    let intervals = blocks
        .into_iter()
        .filter_map(|(begin, end)| Interval::new(begin, end).ok())
        .filter_map(|iv| iv.intersect(window));
    IntervalSet::from_intervals(intervals, tolerance)
}

/// Vessel store loaded from a JSON document
/// `{ "blocks": [...], "observations": [...] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonVesselSource {
    #[serde(default)]
    pub blocks: Vec<VesselBlock>,
    #[serde(default)]
    pub observations: Vec<VesselObservation>,
}

impl JsonVesselSource {
    pub fn new(blocks: Vec<VesselBlock>, observations: Vec<VesselObservation>) -> Self {
        Self {
            blocks,
            observations,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vessel file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse vessel file {}", path.display()))
    }
}

#[async_trait]
impl VesselSource for JsonVesselSource {
    async fn coverage(&self, area: &GeoBox, window: &Interval) -> Result<IntervalSet> {
        let blocks = self
            .blocks
            .iter()
            .filter(|b| b.area.contains_box(area))
            .map(|b| (b.begin, b.end));
        Ok(blocks_to_coverage(blocks, window, Duration::zero()))
    }

    async fn observations(&self, area: &GeoBox, window: &Interval) -> Result<Vec<VesselObservation>> {
        let mut obs: Vec<VesselObservation> = self
            .observations
            .iter()
            .filter(|o| window.contains(o.time) && area.contains(o.lat, o.lon))
            .cloned()
            .collect();
        obs.sort_by(|a, b| (a.vessel_id, a.time).cmp(&(b.vessel_id, b.time)));
        Ok(obs)
    }
}

/// Vessel store backed by the PostgreSQL tracking tables
pub struct PostgresqlVesselSource {
    pool: deadpool_postgres::Pool,
}

impl PostgresqlVesselSource {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }
}

fn to_db_box(area: &GeoBox) -> tehom_db::BoundingBox {
    tehom_db::BoundingBox {
        min_lat: area.min_lat,
        min_lon: area.min_lon,
        max_lat: area.max_lat,
        max_lon: area.max_lon,
    }
}

#[async_trait]
impl VesselSource for PostgresqlVesselSource {
    async fn coverage(&self, area: &GeoBox, window: &Interval) -> Result<IntervalSet> {
        let client = self.pool.get().await?;
        let blocks =
            tehom_db::get_vessel_blocks(&**client, window.lower(), window.upper(), &to_db_box(area))
                .await?;
        Ok(blocks_to_coverage(
            blocks.into_iter().map(|b| (b.begin_at, b.end_at)),
            window,
            Duration::zero(),
        ))
    }

    async fn observations(&self, area: &GeoBox, window: &Interval) -> Result<Vec<VesselObservation>> {
        let client = self.pool.get().await?;
        let rows =
            tehom_db::get_vessel_records(&**client, window.lower(), window.upper(), &to_db_box(area))
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| VesselObservation {
                vessel_id: r.mmsi,
                time: r.recorded_at,
                lat: r.lat,
                lon: r.lon,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn h(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2016, 1, 1, hour, 0, 0).unwrap()
    }

    fn source() -> JsonVesselSource {
        JsonVesselSource::new(
            vec![
                VesselBlock {
                    begin: h(0),
                    end: h(6),
                    area: GeoBox::new((40.0, -130.0), (50.0, -120.0)).unwrap(),
                },
                VesselBlock {
                    begin: h(6),
                    end: h(12),
                    area: GeoBox::new((48.0, -124.0), (49.0, -123.0)).unwrap(),
                },
            ],
            vec![
                VesselObservation { vessel_id: 2, time: h(2), lat: 48.5, lon: -123.5 },
                VesselObservation { vessel_id: 1, time: h(3), lat: 48.5, lon: -123.5 },
                VesselObservation { vessel_id: 1, time: h(1), lat: 48.4, lon: -123.4 },
                VesselObservation { vessel_id: 3, time: h(1), lat: 10.0, lon: 10.0 },
            ],
        )
    }

    #[tokio::test]
    async fn test_coverage_requires_block_to_contain_area() {
        let src = source();
        let window = Interval::new(h(0), h(12)).unwrap();

        let near = GeoBox::around(48.5, -123.5, 0.25);
        let cov = src.coverage(&near, &window).await.unwrap();
        assert_eq!(cov.as_slice(), &[Interval::new(h(0), h(12)).unwrap()]);

        let wide = GeoBox::around(48.5, -123.5, 1.0);
        let cov = src.coverage(&wide, &window).await.unwrap();
        assert_eq!(cov.as_slice(), &[Interval::new(h(0), h(6)).unwrap()]);
    }

    #[tokio::test]
    async fn test_observations_filtered_and_ordered() {
        let src = source();
        let window = Interval::new(h(0), h(3)).unwrap();
        let obs = src
            .observations(&GeoBox::around(48.5, -123.5, 0.25), &window)
            .await
            .unwrap();
        let keys: Vec<_> = obs.iter().map(|o| (o.vessel_id, o.time)).collect();
        assert_eq!(keys, vec![(1, h(1)), (2, h(2))]);
    }
}
