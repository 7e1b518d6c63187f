//! State file structures

use chrono::{DateTime, Utc};
use crc::{Crc, CRC_64_ECMA_182};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::StateError;

/// Magic string identifying a tehom state file
pub const MAGIC: &str = "TEHOM-STATE";

/// Current format version
pub const VERSION: u16 = 1;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// On-disk encoding of a state file
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StateFormat {
    Json,
    Bson,
    #[default]
    Auto, // Pick from the file extension
}

impl StateFormat {
    /// Resolve `Auto` against a concrete path
    pub fn resolve(self, path: &Path) -> StateFormat {
        match self {
            StateFormat::Auto => match path.extension().and_then(|e| e.to_str()) {
                Some("bson") => StateFormat::Bson,
                _ => StateFormat::Json,
            },
            other => other,
        }
    }
}

/// Last certified end for one deployment, keyed by `(sensor, begin)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub sensor: String,
    pub begin: DateTime<Utc>,
    pub certified_end: DateTime<Utc>,
}

/// One certified span row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: i64,
    pub sensor: String,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// Half-open `[begin, end)` range inside a coverage set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRecord {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Canonical interval set stored under `(sensor, extension)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub sensor: String,
    pub extension: String,
    pub ranges: Vec<RangeRecord>,
}

/// Everything the checksum covers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub progress: Vec<ProgressRecord>,
    pub spans: Vec<SpanRecord>,
    pub coverage: Vec<CoverageRecord>,
}

/// Complete state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub magic: String,
    pub version: u16,
    /// CRC-64/ECMA-182 of the JSON-encoded payload, as 16 hex digits
    pub checksum: String,
    pub written_at: DateTime<Utc>,
    pub payload: StatePayload,
}

impl StatePayload {
    /// Checksum over the canonical JSON encoding of the payload
    pub fn checksum(&self) -> Result<String, StateError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("{:016x}", CRC64.checksum(&bytes)))
    }

    /// Next free span id
    pub fn next_span_id(&self) -> i64 {
        self.spans.iter().map(|s| s.id).max().unwrap_or(0) + 1
    }

    /// Structural checks applied to every loaded payload
    pub fn validate(&self) -> Result<(), StateError> {
        let mut keys = HashSet::new();
        for p in &self.progress {
            if p.sensor.is_empty() {
                return Err(StateError::Invalid("progress entry with empty sensor".into()));
            }
            if p.certified_end < p.begin {
                return Err(StateError::Invalid(format!(
                    "progress for {} at {} ends before it begins",
                    p.sensor, p.begin
                )));
            }
            if !keys.insert((p.sensor.as_str(), p.begin)) {
                return Err(StateError::Invalid(format!(
                    "duplicate progress entry for {} at {}",
                    p.sensor, p.begin
                )));
            }
        }

        let mut ids = HashSet::new();
        for s in &self.spans {
            if s.begin >= s.end {
                return Err(StateError::Invalid(format!(
                    "span {} for {} is empty or inverted",
                    s.id, s.sensor
                )));
            }
            if !(-90.0..=90.0).contains(&s.lat) || !(-180.0..=180.0).contains(&s.lon) {
                return Err(StateError::Invalid(format!(
                    "span {} for {} has out-of-range position ({}, {})",
                    s.id, s.sensor, s.lat, s.lon
                )));
            }
            if !ids.insert(s.id) {
                return Err(StateError::Invalid(format!("duplicate span id {}", s.id)));
            }
        }

        let mut coverage_keys = HashSet::new();
        for c in &self.coverage {
            if !coverage_keys.insert((c.sensor.as_str(), c.extension.as_str())) {
                return Err(StateError::Invalid(format!(
                    "duplicate coverage set for {}/{}",
                    c.sensor, c.extension
                )));
            }
            for r in &c.ranges {
                if r.begin >= r.end {
                    return Err(StateError::Invalid(format!(
                        "empty range in coverage for {}/{}",
                        c.sensor, c.extension
                    )));
                }
            }
            // Stored sets are canonical: sorted and disjoint
            if c.ranges.windows(2).any(|w| w[1].begin <= w[0].end) {
                return Err(StateError::Invalid(format!(
                    "coverage for {}/{} is not in canonical order",
                    c.sensor, c.extension
                )));
            }
        }

        Ok(())
    }
}

impl StateFile {
    /// Wrap a payload with a fresh header
    pub fn new(payload: StatePayload) -> Result<Self, StateError> {
        Ok(Self {
            magic: MAGIC.to_string(),
            version: VERSION,
            checksum: payload.checksum()?,
            written_at: Utc::now(),
            payload,
        })
    }

    /// Verify header and payload
    pub fn verify(&self) -> Result<(), StateError> {
        if self.magic != MAGIC {
            return Err(StateError::BadMagic {
                found: self.magic.clone(),
                expected: MAGIC,
            });
        }
        if self.version != VERSION {
            return Err(StateError::UnsupportedVersion {
                found: self.version,
                supported: VERSION,
            });
        }
        let computed = self.payload.checksum()?;
        if computed != self.checksum {
            return Err(StateError::ChecksumMismatch {
                stored: self.checksum.clone(),
                computed,
            });
        }
        self.payload.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_fresh_file_verifies() {
        let payload = StatePayload {
            progress: vec![ProgressRecord {
                sensor: "ICLISTENHF1252".into(),
                begin: ts(0),
                certified_end: ts(5),
            }],
            ..Default::default()
        };
        let file = StateFile::new(payload).unwrap();
        assert!(file.verify().is_ok());
    }

    #[test]
    fn test_tampered_payload_fails_checksum() {
        let mut file = StateFile::new(StatePayload::default()).unwrap();
        file.payload.progress.push(ProgressRecord {
            sensor: "ICLISTENHF1252".into(),
            begin: ts(0),
            certified_end: ts(1),
        });
        assert!(matches!(
            file.verify(),
            Err(StateError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let mut file = StateFile::new(StatePayload::default()).unwrap();
        file.version = VERSION + 1;
        assert!(matches!(
            file.verify(),
            Err(StateError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_overlapping_coverage_is_invalid() {
        let payload = StatePayload {
            coverage: vec![CoverageRecord {
                sensor: "a".into(),
                extension: "mp3".into(),
                ranges: vec![
                    RangeRecord { begin: ts(0), end: ts(2) },
                    RangeRecord { begin: ts(1), end: ts(3) },
                ],
            }],
            ..Default::default()
        };
        assert!(matches!(payload.validate(), Err(StateError::Invalid(_))));
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(StateFormat::Auto.resolve(Path::new("s.bson")), StateFormat::Bson);
        assert_eq!(StateFormat::Auto.resolve(Path::new("s.json")), StateFormat::Json);
        assert_eq!(StateFormat::Json.resolve(Path::new("s.bson")), StateFormat::Json);
    }
}
