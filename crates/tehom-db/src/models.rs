use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of `certification_progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub sensor: String,
    pub begin_at: DateTime<Utc>,
    pub certified_end: DateTime<Utc>,
}

/// Input for upserting a progress entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProgress {
    pub sensor: String,
    pub begin_at: DateTime<Utc>,
    pub certified_end: DateTime<Utc>,
}

/// Row of `certified_spans`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRow {
    pub id: i64,
    pub sensor: String,
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// Input structure for inserting a certified span
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCertifiedSpan {
    pub sensor: String,
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// One `[begin_at, end_at)` row of `coverage_ranges`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRange {
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

/// Row of `vessel_records`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselRecordRow {
    pub mmsi: i64,
    pub recorded_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// Row of `vessel_blocks`: one downloaded block of tracking records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselBlockRow {
    pub begin_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Geographic filter for vessel queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}
