//! Certification and sampling parameters
//!
//! Durations are written in seconds (or milliseconds where noted) in the
//! TOML file and exposed as `chrono::Duration` through accessors.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Upper bound on any configured duration: ten years
pub const MAX_DURATION_S: f64 = 10.0 * 365.0 * 86_400.0;

fn seconds(s: f64) -> Duration {
    Duration::milliseconds((s * 1000.0).round() as i64)
}

/// Finite, within `MAX_DURATION_S`, and positive unless `allow_zero`
fn check_seconds(name: &str, value: f64, allow_zero: bool) -> anyhow::Result<()> {
    if !value.is_finite() || value > MAX_DURATION_S {
        anyhow::bail!("{} must be a finite number of seconds <= {}", name, MAX_DURATION_S);
    }
    if value < 0.0 || (value == 0.0 && !allow_zero) {
        let bound = if allow_zero { ">= 0" } else { "> 0" };
        anyhow::bail!("{} must be {}", name, bound);
    }
    Ok(())
}

/// How the certifier scans the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationConfig {
    /// File extension requested from the catalog
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Nominal length of one catalog file
    #[serde(default = "default_file_duration")]
    pub file_duration_s: f64,
    /// Gaps up to this size are merged into one span
    #[serde(default = "default_merge_tolerance")]
    pub merge_tolerance_ms: i64,
    /// Filenames requested per catalog page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Attempts after the first on a transient catalog failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff, doubled on every retry
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Smallest range the certifier bisects down to when the catalog
    /// rejects a request as malformed
    #[serde(default = "default_min_split")]
    pub min_split_s: f64,
}

impl Default for CertificationConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            file_duration_s: default_file_duration(),
            merge_tolerance_ms: default_merge_tolerance(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            min_split_s: default_min_split(),
        }
    }
}

fn default_extension() -> String {
    "mp3".to_string()
}
fn default_file_duration() -> f64 {
    300.0
}
fn default_merge_tolerance() -> i64 {
    crate::interval::DEFAULT_MERGE_TOLERANCE_MS
}
fn default_page_size() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_min_split() -> f64 {
    3600.0
}

impl CertificationConfig {
    pub fn file_duration(&self) -> Duration {
        seconds(self.file_duration_s)
    }

    pub fn merge_tolerance(&self) -> Duration {
        Duration::milliseconds(self.merge_tolerance_ms)
    }

    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn min_split(&self) -> Duration {
        seconds(self.min_split_s)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.extension.is_empty() || self.extension.contains('.') {
            anyhow::bail!("extension must be a bare file extension such as \"mp3\"");
        }
        check_seconds("file_duration_s", self.file_duration_s, false)?;
        check_seconds("min_split_s", self.min_split_s, false)?;
        if self.merge_tolerance_ms < 0 || self.merge_tolerance_ms as f64 > MAX_DURATION_S * 1000.0 {
            anyhow::bail!("merge_tolerance_ms must be >= 0 and <= {} s", MAX_DURATION_S);
        }
        if self.retry_backoff_ms as f64 > MAX_DURATION_S * 1000.0 {
            anyhow::bail!("retry_backoff_ms must be <= {} s", MAX_DURATION_S);
        }
        if self.page_size == 0 {
            anyhow::bail!("page_size must be > 0");
        }
        Ok(())
    }
}

/// Settings for repeatable samples.
///
/// The same parameters over the same window always produce the same sample
/// set. The two interpolation thresholds have no defaults and must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Length of one observation; samples are its end instants
    #[serde(default = "default_duration")]
    pub duration_s: f64,
    /// Distance between consecutive sample end instants
    #[serde(default = "default_spacing")]
    pub spacing_s: f64,
    /// Both bracketing vessel fixes must lie this close to interpolate
    pub near_threshold_s: f64,
    /// A lone vessel fix must lie this close to be held
    pub very_near_threshold_s: f64,
    /// Half-width in degrees of the box around a sensor searched for vessels
    #[serde(default = "default_label_radius")]
    pub label_radius_deg: f64,
}

fn default_duration() -> f64 {
    1.0
}
fn default_spacing() -> f64 {
    300.0
}
fn default_label_radius() -> f64 {
    0.25
}

impl SamplingConfig {
    /// Sampling parameters with the default duration, spacing and radius
    pub fn with_thresholds(near_threshold_s: f64, very_near_threshold_s: f64) -> Self {
        Self {
            duration_s: default_duration(),
            spacing_s: default_spacing(),
            near_threshold_s,
            very_near_threshold_s,
            label_radius_deg: default_label_radius(),
        }
    }

    pub fn duration(&self) -> Duration {
        seconds(self.duration_s)
    }

    pub fn spacing(&self) -> Duration {
        seconds(self.spacing_s)
    }

    pub fn near_threshold(&self) -> Duration {
        seconds(self.near_threshold_s)
    }

    pub fn very_near_threshold(&self) -> Duration {
        seconds(self.very_near_threshold_s)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        check_seconds("duration_s", self.duration_s, false)?;
        check_seconds("spacing_s", self.spacing_s, false)?;
        check_seconds("near_threshold_s", self.near_threshold_s, true)?;
        check_seconds("very_near_threshold_s", self.very_near_threshold_s, true)?;
        if self.very_near_threshold_s > self.near_threshold_s {
            anyhow::bail!("very_near_threshold_s must be <= near_threshold_s");
        }
        if !(self.label_radius_deg > 0.0 && self.label_radius_deg <= 90.0) {
            anyhow::bail!("label_radius_deg must be in (0, 90]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certification_defaults() {
        let config = CertificationConfig::default();
        assert_eq!(config.extension, "mp3");
        assert_eq!(config.file_duration(), Duration::minutes(5));
        assert_eq!(config.merge_tolerance(), Duration::milliseconds(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sampling_defaults() {
        let config = SamplingConfig::with_thresholds(5.0, 2.0);
        assert_eq!(config.duration(), Duration::seconds(1));
        assert_eq!(config.spacing(), Duration::minutes(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = SamplingConfig::with_thresholds(2.0, 5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_sampling_values_rejected() {
        let spacing = SamplingConfig {
            spacing_s: f64::INFINITY,
            ..SamplingConfig::with_thresholds(5.0, 2.0)
        };
        assert!(spacing.validate().is_err());

        let huge = SamplingConfig {
            spacing_s: 1e13,
            ..SamplingConfig::with_thresholds(5.0, 2.0)
        };
        assert!(huge.validate().is_err());

        assert!(SamplingConfig::with_thresholds(f64::NAN, f64::NAN).validate().is_err());
        assert!(SamplingConfig::with_thresholds(5.0, f64::NAN).validate().is_err());

        let radius = SamplingConfig {
            label_radius_deg: f64::NAN,
            ..SamplingConfig::with_thresholds(5.0, 2.0)
        };
        assert!(radius.validate().is_err());
    }

    #[test]
    fn test_non_finite_certification_values_rejected() {
        let file_duration = CertificationConfig {
            file_duration_s: f64::NAN,
            ..Default::default()
        };
        assert!(file_duration.validate().is_err());

        let min_split = CertificationConfig {
            min_split_s: f64::INFINITY,
            ..Default::default()
        };
        assert!(min_split.validate().is_err());
    }

    #[test]
    fn test_zero_thresholds_allowed() {
        assert!(SamplingConfig::with_thresholds(0.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_dotted_extension_rejected() {
        let config = CertificationConfig {
            extension: ".mp3".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
