//! Deterministic sample scheduling
//!
//! Samples are the *end* instants of fixed-length observations. Within an
//! interval the first sample ends one duration after the lower bound and
//! the rest follow at a fixed spacing, so the same parameters always give
//! the same sample set.

use chrono::Duration;
use serde::Serialize;

use crate::interval::{Interval, Timestamp};
use crate::overlap::SensorCoverage;

/// Scheduled samples for one sensor over one coverage segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleWindow {
    pub sensor: String,
    pub interval: Interval,
    pub lat: f64,
    pub lon: f64,
    /// Ascending sample end times
    pub times: Vec<Timestamp>,
}

/// Sample end times `lower + duration + i * spacing` up to and including
/// `upper`.
///
/// Empty when the interval is shorter than `duration` or when either
/// parameter is not positive.
pub fn schedule_samples(interval: &Interval, duration: Duration, spacing: Duration) -> Vec<Timestamp> {
    if duration <= Duration::zero() || spacing <= Duration::zero() {
        return Vec::new();
    }

    let mut times = Vec::new();
    let mut next = interval.lower().checked_add_signed(duration);
    while let Some(t) = next.filter(|t| *t <= interval.upper()) {
        times.push(t);
        next = t.checked_add_signed(spacing);
    }
    times
}

/// One window per coverage segment that fits at least one sample
pub fn schedule_coverage(coverage: &SensorCoverage, duration: Duration, spacing: Duration) -> Vec<SampleWindow> {
    coverage
        .segments
        .iter()
        .filter_map(|segment| {
            let times = schedule_samples(&segment.interval, duration, spacing);
            (!times.is_empty()).then(|| SampleWindow {
                sensor: coverage.sensor.clone(),
                interval: segment.interval,
                lat: segment.lat,
                lon: segment.lon,
                times,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{default_tolerance, IntervalSet};
    use crate::overlap::CoverageSegment;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_thirty_minutes_at_five_minute_spacing() {
        let interval = Interval::starting_at(t0(), Duration::minutes(30)).unwrap();
        let times = schedule_samples(&interval, Duration::seconds(1), Duration::minutes(5));

        let expected: Vec<Timestamp> = (0..6)
            .map(|i| t0() + Duration::seconds(1) + Duration::minutes(5 * i))
            .collect();
        assert_eq!(times, expected);
        assert_eq!(times.last(), Some(&(t0() + Duration::minutes(25) + Duration::seconds(1))));
    }

    #[test]
    fn test_interval_shorter_than_duration() {
        let interval = Interval::starting_at(t0(), Duration::milliseconds(999)).unwrap();
        assert!(schedule_samples(&interval, Duration::seconds(1), Duration::minutes(5)).is_empty());
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let interval = Interval::starting_at(t0(), Duration::seconds(1)).unwrap();
        assert_eq!(
            schedule_samples(&interval, Duration::seconds(1), Duration::minutes(5)),
            vec![t0() + Duration::seconds(1)]
        );
    }

    #[test]
    fn test_non_positive_parameters() {
        let interval = Interval::starting_at(t0(), Duration::minutes(30)).unwrap();
        assert!(schedule_samples(&interval, Duration::zero(), Duration::minutes(5)).is_empty());
        assert!(schedule_samples(&interval, Duration::seconds(1), Duration::zero()).is_empty());
    }

    #[test]
    fn test_spacing_past_the_calendar_stops() {
        let interval = Interval::starting_at(t0(), Duration::minutes(30)).unwrap();
        let far = Duration::days(100_000_000);
        assert_eq!(
            schedule_samples(&interval, Duration::seconds(1), far),
            vec![t0() + Duration::seconds(1)]
        );
        assert!(schedule_samples(&interval, far, Duration::minutes(5)).is_empty());
    }

    #[test]
    fn test_repeatable() {
        let interval = Interval::starting_at(t0(), Duration::hours(6)).unwrap();
        let a = schedule_samples(&interval, Duration::seconds(1), Duration::seconds(37));
        let b = schedule_samples(&interval, Duration::seconds(1), Duration::seconds(37));
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_schedule_coverage_skips_short_segments() {
        let long = Interval::starting_at(t0(), Duration::minutes(10)).unwrap();
        let short = Interval::starting_at(t0() + Duration::hours(1), Duration::milliseconds(500)).unwrap();
        let coverage = SensorCoverage {
            sensor: "H1".into(),
            intervals: IntervalSet::from_intervals([long, short], default_tolerance()),
            segments: vec![
                CoverageSegment { interval: long, lat: 48.5, lon: -123.5 },
                CoverageSegment { interval: short, lat: 48.5, lon: -123.5 },
            ],
            ambiguous: vec![],
        };

        let windows = schedule_coverage(&coverage, Duration::seconds(1), Duration::minutes(5));
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].times.len(), 2);
    }
}
