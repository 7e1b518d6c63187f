//! Timestamps embedded in catalog filenames
//!
//! Catalog files are named `<DEVICE>_<YYYYMMDD>T<HHMMSS>[.fff]Z[-suffix].<ext>`,
//! e.g. `ICLISTENHF1252_20160101T000000.000Z.mp3`. The timestamp is the token
//! after the last underscore of the file stem and is always UTC.

use chrono::{Duration, NaiveDateTime};

use crate::interval::{Interval, Timestamp};

/// Extract the start time encoded in a catalog filename
pub fn extract_timestamp(filename: &str) -> Option<Timestamp> {
    let name = filename.rsplit(['/', '\\']).next()?;
    let (_, token) = name.rsplit_once('_')?;
    let (stamp, _) = token.split_once('Z')?;

    let (whole, fraction) = match stamp.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (stamp, None),
    };

    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%dT%H%M%S").ok()?;
    let mut ts = naive.and_utc();

    if let Some(fraction) = fraction {
        if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let nanos: i64 = format!("{:0<9}", fraction).parse().ok()?;
        ts += Duration::nanoseconds(nanos);
    }

    Some(ts)
}

/// Interval covered by one catalog file of nominal length `duration`
pub fn file_interval(filename: &str, duration: Duration) -> Option<Interval> {
    let start = extract_timestamp(filename)?;
    Interval::starting_at(start, duration).ok()
}

/// Whether `filename` carries the requested extension (case-insensitive)
pub fn has_extension(filename: &str, extension: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
