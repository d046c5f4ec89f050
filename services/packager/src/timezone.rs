//! Localization of naive capture times.
//!
//! Field recorders are usually set to local time. Some of them never switch to
//! summer time, so besides the zone's regular rules a "winter time all year"
//! policy is supported: the zone's standard offset is applied regardless of
//! daylight saving.

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, Offset, TimeZone};
use chrono_tz::{OffsetComponents, Tz};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimezoneError {
    #[error(
        "You have to specify a correct timezone. See:\n\
         https://en.wikipedia.org/wiki/List_of_tz_database_time_zones"
    )]
    Unknown(String),

    #[error("Local time {0} cannot be represented in the requested zone")]
    Unrepresentable(NaiveDateTime),
}

/// Resolve an IANA zone identifier (e.g. "Europe/Warsaw")
pub fn resolve_zone(name: &str) -> Result<Tz, TimezoneError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimezoneError::Unknown(name.to_string()))
}

/// Attach `zone` to a naive local timestamp.
///
/// With `ignore_dst == false` the zone's rules decide the offset; an ambiguous
/// time (autumn fold) resolves to the standard-time reading and a time inside
/// the spring gap is read with the standard offset.
///
/// With `ignore_dst == true` the zone's standard offset at that instant is used
/// even when daylight saving is in force. The result is expressed in `zone`.
pub fn localize(
    naive: NaiveDateTime,
    zone: Tz,
    ignore_dst: bool,
) -> Result<DateTime<Tz>, TimezoneError> {
    if ignore_dst {
        return localize_standard(naive, zone);
    }

    match zone.offset_from_local_datetime(&naive) {
        LocalResult::Single(offset) => attach(naive, offset.fix()).map(|dt| dt.with_timezone(&zone)),
        LocalResult::Ambiguous(first, second) => {
            let standard = if first.dst_offset().is_zero() { first } else { second };
            attach(naive, standard.fix()).map(|dt| dt.with_timezone(&zone))
        }
        LocalResult::None => localize_standard(naive, zone),
    }
}

/// Read `naive` with the zone's standard (non-DST) offset
fn localize_standard(naive: NaiveDateTime, zone: Tz) -> Result<DateTime<Tz>, TimezoneError> {
    let offset = match zone.offset_from_local_datetime(&naive) {
        LocalResult::Single(offset) => offset,
        LocalResult::Ambiguous(first, _) => first,
        LocalResult::None => zone.offset_from_utc_datetime(&naive),
    };

    let standard = offset.base_utc_offset().num_seconds();
    let standard = i32::try_from(standard)
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or(TimezoneError::Unrepresentable(naive))?;

    attach(naive, standard).map(|dt| dt.with_timezone(&zone))
}

fn attach(naive: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<FixedOffset>, TimezoneError> {
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or(TimezoneError::Unrepresentable(naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn utc_string(dt: DateTime<Tz>) -> String {
        dt.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%S%z").to_string()
    }

    #[test]
    fn test_resolve_zone() {
        assert_eq!(resolve_zone("Europe/Warsaw").unwrap(), chrono_tz::Europe::Warsaw);
        assert!(matches!(
            resolve_zone("Mars/Olympus"),
            Err(TimezoneError::Unknown(_))
        ));
    }

    #[test]
    fn test_summer_time_standard_rules() {
        let dt = localize(naive(2023, 6, 1, 8, 0), chrono_tz::Europe::Warsaw, false).unwrap();
        assert_eq!(dt.format("%z").to_string(), "+0200");
        assert_eq!(utc_string(dt), "2023-06-01T06:00:00+0000");
    }

    #[test]
    fn test_summer_time_ignoring_dst() {
        let dt = localize(naive(2023, 6, 1, 8, 0), chrono_tz::Europe::Warsaw, true).unwrap();
        assert_eq!(utc_string(dt), "2023-06-01T07:00:00+0000");
        // still expressed in the zone, so the wall clock moves forward an hour
        assert_eq!(dt.format("%H:%M%z").to_string(), "09:00+0200");
    }

    #[test]
    fn test_policies_agree_outside_dst() {
        let winter = naive(2023, 1, 15, 12, 0);
        let a = localize(winter, chrono_tz::Europe::Warsaw, false).unwrap();
        let b = localize(winter, chrono_tz::Europe::Warsaw, true).unwrap();
        assert_eq!(a, b);
        assert_eq!(utc_string(a), "2023-01-15T11:00:00+0000");
    }

    #[test]
    fn test_policies_differ_only_across_transition() {
        let zone = chrono_tz::Europe::Warsaw;
        // 2023-03-26 02:00 -> 03:00 local
        let before = naive(2023, 3, 26, 1, 30);
        let after = naive(2023, 3, 26, 4, 0);

        assert_eq!(
            localize(before, zone, false).unwrap(),
            localize(before, zone, true).unwrap()
        );
        assert_ne!(
            localize(after, zone, false).unwrap(),
            localize(after, zone, true).unwrap()
        );
    }

    #[test]
    fn test_ambiguous_time_reads_as_standard() {
        // 2023-10-29 03:00 -> 02:00 local, 02:30 occurs twice
        let dt = localize(naive(2023, 10, 29, 2, 30), chrono_tz::Europe::Warsaw, false).unwrap();
        assert_eq!(utc_string(dt), "2023-10-29T01:30:00+0000");
    }

    #[test]
    fn test_gap_time_reads_as_standard() {
        let dt = localize(naive(2023, 3, 26, 2, 30), chrono_tz::Europe::Warsaw, false).unwrap();
        assert_eq!(utc_string(dt), "2023-03-26T01:30:00+0000");
    }

    #[test]
    fn test_zone_without_dst() {
        let dt = localize(naive(2023, 6, 1, 8, 0), chrono_tz::Africa::Nairobi, true).unwrap();
        assert_eq!(utc_string(dt), "2023-06-01T05:00:00+0000");
    }
}
