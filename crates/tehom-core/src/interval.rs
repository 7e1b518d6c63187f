//! Half-open time intervals and canonical interval sets
//!
//! An [`IntervalSet`] is always kept in canonical form: sorted by lower
//! bound, with every gap between consecutive intervals strictly larger than
//! the set's merge tolerance. Two intervals closer than that are the same
//! span.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Timestamp = DateTime<Utc>;

/// Default merge tolerance between adjacent intervals
pub const DEFAULT_MERGE_TOLERANCE_MS: i64 = 500;

pub fn default_tolerance() -> Duration {
    Duration::milliseconds(DEFAULT_MERGE_TOLERANCE_MS)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("interval lower bound {lower} is not before upper bound {upper}")]
pub struct EmptyInterval {
    pub lower: Timestamp,
    pub upper: Timestamp,
}

/// `[lower, upper)` with `lower < upper`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Interval {
    lower: Timestamp,
    upper: Timestamp,
}

impl Interval {
    pub fn new(lower: Timestamp, upper: Timestamp) -> Result<Self, EmptyInterval> {
        if lower < upper {
            Ok(Self { lower, upper })
        } else {
            Err(EmptyInterval { lower, upper })
        }
    }

    /// Interval of `duration` starting at `lower`
    pub fn starting_at(lower: Timestamp, duration: Duration) -> Result<Self, EmptyInterval> {
        Self::new(lower, lower + duration)
    }

    pub fn lower(&self) -> Timestamp {
        self.lower
    }

    pub fn upper(&self) -> Timestamp {
        self.upper
    }

    pub fn duration(&self) -> Duration {
        self.upper - self.lower
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.lower <= t && t < self.upper
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.lower < other.upper && other.lower < self.upper
    }

    /// Overlap of two intervals, `None` when they are disjoint
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        Interval::new(self.lower.max(other.lower), self.upper.min(other.upper)).ok()
    }
}

/// Canonical set of disjoint intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
    #[serde(skip)]
    tolerance: Duration,
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::empty(default_tolerance())
    }
}

impl IntervalSet {
    pub fn empty(tolerance: Duration) -> Self {
        Self {
            intervals: Vec::new(),
            tolerance,
        }
    }

    /// Build a canonical set from intervals in any order
    pub fn from_intervals<I>(intervals: I, tolerance: Duration) -> Self
    where
        I: IntoIterator<Item = Interval>,
    {
        Self {
            intervals: sweep(intervals.into_iter().collect(), tolerance),
            tolerance,
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// New set with `interval` merged in
    #[must_use]
    pub fn insert(&self, interval: Interval) -> IntervalSet {
        let mut all = self.intervals.clone();
        all.push(interval);
        Self {
            intervals: sweep(all, self.tolerance),
            tolerance: self.tolerance,
        }
    }

    /// Union of two sets, merged with the larger of the two tolerances
    #[must_use]
    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let tolerance = self.tolerance.max(other.tolerance);
        let mut all = Vec::with_capacity(self.len() + other.len());
        all.extend_from_slice(&self.intervals);
        all.extend_from_slice(&other.intervals);
        Self {
            intervals: sweep(all, tolerance),
            tolerance,
        }
    }

    /// Time covered by both sets
    #[must_use]
    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let a = &self.intervals[i];
            let b = &other.intervals[j];
            if let Some(overlap) = a.intersect(b) {
                out.push(overlap);
            }
            if a.upper <= b.upper {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self {
            intervals: sweep(out, self.tolerance),
            tolerance: self.tolerance,
        }
    }

    /// Restrict the set to `window`
    #[must_use]
    pub fn clip(&self, window: &Interval) -> IntervalSet {
        Self {
            intervals: self
                .intervals
                .iter()
                .filter_map(|iv| iv.intersect(window))
                .collect(),
            tolerance: self.tolerance,
        }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        let idx = self.intervals.partition_point(|iv| iv.lower <= t);
        idx > 0 && self.intervals[idx - 1].upper > t
    }

    pub fn total_duration(&self) -> Duration {
        self.intervals
            .iter()
            .fold(Duration::zero(), |acc, iv| acc + iv.duration())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.intervals.iter()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}

/// Sort by lower bound and fold every interval starting within
/// `tolerance` of the running one into it.
fn sweep(mut intervals: Vec<Interval>, tolerance: Duration) -> Vec<Interval> {
    intervals.sort_unstable();

    let mut out: Vec<Interval> = Vec::with_capacity(intervals.len());
    let mut iter = intervals.into_iter();
    let Some(mut cur) = iter.next() else {
        return out;
    };

    for next in iter {
        if next.lower <= cur.upper + tolerance {
            cur.upper = cur.upper.max(next.upper);
        } else {
            out.push(cur);
            cur = next;
        }
    }
    out.push(cur);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn iv(a: i64, b: i64) -> Interval {
        Interval::new(t(a), t(b)).unwrap()
    }

    fn set(ivs: &[(i64, i64)]) -> IntervalSet {
        IntervalSet::from_intervals(ivs.iter().map(|&(a, b)| iv(a, b)), default_tolerance())
    }

    fn assert_canonical(s: &IntervalSet) {
        for w in s.as_slice().windows(2) {
            assert!(w[1].lower() > w[0].upper() + s.tolerance());
        }
    }

    #[test]
    fn test_empty_interval_rejected() {
        assert!(Interval::new(t(5), t(5)).is_err());
        assert!(Interval::new(t(6), t(5)).is_err());
    }

    #[test]
    fn test_sweep_merges_overlaps_and_sorts() {
        let s = set(&[(30, 40), (0, 10), (5, 20), (50, 60)]);
        assert_eq!(s.as_slice(), &[iv(0, 20), iv(30, 40), iv(50, 60)]);
        assert_canonical(&s);
    }

    #[test]
    fn test_gap_within_tolerance_merges() {
        let a = Interval::new(t(0), t(5)).unwrap();
        let b = Interval::new(t(5) + Duration::milliseconds(500), t(10)).unwrap();
        let s = IntervalSet::from_intervals([a, b], default_tolerance());
        assert_eq!(s.as_slice(), &[iv(0, 10)]);
    }

    #[test]
    fn test_gap_beyond_tolerance_stays_distinct() {
        let a = Interval::new(t(0), t(5)).unwrap();
        let b = Interval::new(t(5) + Duration::milliseconds(501), t(10)).unwrap();
        let s = IntervalSet::from_intervals([a, b], default_tolerance());
        assert_eq!(s.len(), 2);
        assert_canonical(&s);
    }

    #[test]
    fn test_five_minute_files_merge() {
        let files = [0, 5, 10].map(|m| Interval::starting_at(t(m), Duration::minutes(5)).unwrap());
        let s = IntervalSet::from_intervals(files, default_tolerance());
        assert_eq!(s.as_slice(), &[iv(0, 15)]);
    }

    #[test]
    fn test_union_laws() {
        let a = set(&[(0, 10), (20, 30)]);
        let b = set(&[(5, 25), (40, 50)]);
        let c = set(&[(45, 70), (100, 110)]);

        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
        assert_eq!(a.union(&a), a);
        assert_canonical(&a.union(&b).union(&c));
        assert_eq!(a.union(&b).as_slice(), &[iv(0, 30), iv(40, 50)]);
    }

    #[test]
    fn test_insert_is_non_destructive() {
        let a = set(&[(0, 10)]);
        let b = a.insert(iv(20, 30));
        assert_eq!(a.len(), 1);
        assert_eq!(b.as_slice(), &[iv(0, 10), iv(20, 30)]);
    }

    #[test]
    fn test_contains_is_half_open() {
        let s = set(&[(0, 10), (20, 30)]);
        assert!(s.contains(t(0)));
        assert!(s.contains(t(9)));
        assert!(!s.contains(t(10)));
        assert!(!s.contains(t(15)));
        assert!(s.contains(t(25)));
        assert!(!s.contains(t(-1)));
    }

    #[test]
    fn test_intersect_and_clip() {
        let a = set(&[(0, 10), (20, 30), (40, 50)]);
        let b = set(&[(5, 25), (45, 60)]);
        assert_eq!(
            a.intersect(&b).as_slice(),
            &[iv(5, 10), iv(20, 25), iv(45, 50)]
        );
        assert_eq!(a.clip(&iv(8, 42)).as_slice(), &[iv(8, 10), iv(20, 30), iv(40, 42)]);
        assert!(a.intersect(&IntervalSet::default()).is_empty());
    }

    #[test]
    fn test_total_duration() {
        let s = set(&[(0, 10), (20, 30)]);
        assert_eq!(s.total_duration(), Duration::minutes(20));
    }
}
