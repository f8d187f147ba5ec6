//! Time window resolution and archive partition keys.
//!
//! The load balancer delivers one or more archives per delivery interval under
//! a key derived from the interval start. Resolving a window floors the
//! reference instant to the interval and builds that key prefix.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Fixed deployment identifiers that make up every partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLayout {
    pub account_id: String,
    pub service: String,
    pub region: String,
    pub load_balancer: String,
}

/// A floor-aligned evaluation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Instant the window was resolved for
    pub reference: DateTime<Utc>,
    /// Window length
    pub granularity: Duration,
    /// Start of the window, `floor <= reference < floor + granularity`
    pub floor: DateTime<Utc>,
}

/// Key prefix under which the archives of one window are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Round `instant` down to a multiple of `granularity` counted from midnight UTC.
///
/// Granularities that do not divide 24h still floor correctly: the last window
/// of the day is simply shorter.
pub fn floor_instant(
    instant: DateTime<Utc>,
    granularity: Duration,
) -> Result<DateTime<Utc>, ConfigError> {
    let step = granularity.as_nanos();
    if step == 0 {
        return Err(ConfigError::Invalid {
            key: "window.granularity",
            reason: "must be greater than zero".to_string(),
        });
    }

    let since_midnight = u128::from(instant.num_seconds_from_midnight()) * NANOS_PER_SEC
        + u128::from(instant.nanosecond());
    let excess = since_midnight % step;

    // excess <= since_midnight, which is under two days of nanoseconds
    Ok(instant - chrono::Duration::nanoseconds(excess as i64))
}

impl ArchiveLayout {
    /// Build the partition key for a window starting at `floor`.
    pub fn partition_key(&self, floor: DateTime<Utc>) -> PartitionKey {
        PartitionKey(format!(
            "AWSLogs/{account}/{service}/{region}/{day}/{account}_{service}_{region}_{lb}_{stamp}",
            account = self.account_id,
            service = self.service,
            region = self.region,
            day = floor.format("%Y/%m/%d"),
            lb = self.load_balancer,
            stamp = floor.format("%Y%m%dT%H%MZ"),
        ))
    }

    /// Resolve the window containing `now` and the key of its archives.
    pub fn resolve(
        &self,
        now: DateTime<Utc>,
        granularity: Duration,
    ) -> Result<(TimeWindow, PartitionKey), ConfigError> {
        let floor = floor_instant(now, granularity)?;
        let window = TimeWindow {
            reference: now,
            granularity,
            floor,
        };
        Ok((window, self.partition_key(floor)))
    }
}

/// Free-function form of [`ArchiveLayout::resolve`].
pub fn resolve_window(
    layout: &ArchiveLayout,
    now: DateTime<Utc>,
    granularity: Duration,
) -> Result<(TimeWindow, PartitionKey), ConfigError> {
    layout.resolve(now, granularity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn layout() -> ArchiveLayout {
        ArchiveLayout {
            account_id: "123456789012".to_string(),
            service: "elasticloadbalancing".to_string(),
            region: "eu-central-1".to_string(),
            load_balancer: "app.front-lb.50dc6c495c0c9188".to_string(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, h, m, s).unwrap()
    }

    #[test]
    fn test_floor_five_minutes() {
        let floored = floor_instant(at(10, 43, 59), Duration::from_secs(300)).unwrap();
        assert_eq!(floored, at(10, 40, 0));
    }

    #[test]
    fn test_floor_already_aligned() {
        let floored = floor_instant(at(10, 40, 0), Duration::from_secs(300)).unwrap();
        assert_eq!(floored, at(10, 40, 0));
    }

    #[test]
    fn test_floor_drops_subsecond_precision() {
        let t = at(0, 0, 7) + chrono::Duration::milliseconds(250);
        let floored = floor_instant(t, Duration::from_secs(5)).unwrap();
        assert_eq!(floored, at(0, 0, 5));
    }

    #[test]
    fn test_floor_uneven_granularity_counts_from_midnight() {
        // 7 minutes does not divide 24h; windows restart at midnight
        let floored = floor_instant(at(0, 15, 0), Duration::from_secs(420)).unwrap();
        assert_eq!(floored, at(0, 14, 0));
        let floored = floor_instant(at(23, 59, 0), Duration::from_secs(420)).unwrap();
        // 1439 minutes -> 205 full windows of 7 min = 1435 min = 23:55
        assert_eq!(floored, at(23, 55, 0));
    }

    #[test]
    fn test_floor_zero_granularity_rejected() {
        let err = floor_instant(at(1, 2, 3), Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("window.granularity"));
    }

    #[test]
    fn test_partition_key_format() {
        let (window, key) = layout().resolve(at(9, 7, 31), Duration::from_secs(300)).unwrap();
        assert_eq!(window.floor, at(9, 5, 0));
        assert_eq!(
            key.as_str(),
            "AWSLogs/123456789012/elasticloadbalancing/eu-central-1/2024/03/07/\
             123456789012_elasticloadbalancing_eu-central-1_app.front-lb.50dc6c495c0c9188_20240307T0905Z"
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let now = at(17, 22, 11);
        let first = resolve_window(&layout(), now, Duration::from_secs(300)).unwrap();
        let second = resolve_window(&layout(), now, Duration::from_secs(300)).unwrap();
        assert_eq!(first, second);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    proptest! {
        /// floor <= t < floor + g, and floor is a whole number of g from midnight
        #[test]
        fn prop_floor_bounds(
            secs in 0i64..4_102_444_800,
            nanos in 0u32..1_000_000_000,
            gran_secs in 1u64..7_200,
        ) {
            let t = Utc.timestamp_opt(secs, nanos).unwrap();
            let g = Duration::from_secs(gran_secs);
            let floor = floor_instant(t, g).unwrap();
            let g_delta = chrono::Duration::seconds(gran_secs as i64);

            prop_assert!(floor <= t);
            prop_assert!(t < floor + g_delta);
            prop_assert_eq!(floor.date_naive(), t.date_naive());

            let from_midnight = u64::from(floor.num_seconds_from_midnight());
            prop_assert_eq!(floor.nanosecond(), 0);
            prop_assert_eq!(from_midnight % gran_secs, 0);
        }

        /// Flooring twice is the same as flooring once
        #[test]
        fn prop_floor_idempotent(secs in 0i64..4_102_444_800, gran_secs in 1u64..7_200) {
            let t = Utc.timestamp_opt(secs, 0).unwrap();
            let g = Duration::from_secs(gran_secs);
            let once = floor_instant(t, g).unwrap();
            let twice = floor_instant(once, g).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
