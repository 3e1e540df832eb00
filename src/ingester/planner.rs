//! Store query planning
//!
//! Decides whether a read must also consult the durable store, and over
//! which window.
//!
//! ```text
//! schema periods ──► shipper_max_look_back ──┐
//! query_store flag ──────────────────────────┼──► plan_store_query ──► Option<TimeRange>
//! configured look-back ──────────────────────┘          │
//!                                                       └─ build_store_request
//! ```

use crate::storage::{duration_nanos, TimeRange, Timestamp};
use crate::store::PeriodConfig;
use std::time::Duration;

/// Window to query in the store, or `None` when the store must not be queried
///
/// A zero `max_look_back` places no limit on how far back the store is read.
pub fn build_store_request(
    query_store: bool,
    max_look_back: Duration,
    start: Timestamp,
    end: Timestamp,
    now: Timestamp,
) -> Option<TimeRange> {
    if !query_store {
        return None;
    }

    let mut store_start = start;
    if !max_look_back.is_zero() {
        store_start = store_start.max(now.saturating_sub(duration_nanos(max_look_back)));
    }

    TimeRange::try_new(store_start, end)
}

/// Look-back imposed by a shipped index
///
/// Walks back from the active period while periods use a shippable index and
/// returns the time elapsed since the earliest of them was activated. Zero
/// when the active period is not shippable.
pub fn shipper_max_look_back(periods: &[PeriodConfig], now: Timestamp) -> Duration {
    let mut earliest: Option<Timestamp> = None;

    for period in periods.iter().rev() {
        if !period.index_type.is_shippable() {
            break;
        }
        earliest = Some(period.from);
    }

    match earliest {
        Some(from) => Duration::from_nanos(u64::try_from(now.saturating_sub(from)).unwrap_or(0)),
        None => Duration::ZERO,
    }
}

/// Combine the configured policy with the schema to plan a store read
///
/// A shippable active index turns store reads on even when `query_store` is
/// off, and its look-back replaces the configured one.
pub fn plan_store_query(
    query_store: bool,
    configured_look_back: Duration,
    periods: &[PeriodConfig],
    start: Timestamp,
    end: Timestamp,
    now: Timestamp,
) -> Option<TimeRange> {
    let shipper = shipper_max_look_back(periods, now);
    let enabled = query_store || !shipper.is_zero();
    let look_back = if shipper.is_zero() {
        configured_look_back
    } else {
        shipper
    };
    build_store_request(enabled, look_back, start, end, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NANOS_PER_MILLI;
    use crate::store::IndexType;

    const HOUR: i64 = 3_600_000 * NANOS_PER_MILLI;

    #[test]
    fn test_zero_look_back_is_unlimited() {
        let now = 100 * HOUR;
        let range = build_store_request(true, Duration::ZERO, 0, now, now).unwrap();
        assert_eq!(range, TimeRange::new(0, now));
    }

    #[test]
    fn test_plan_enables_store_for_shipper() {
        let now = 100 * HOUR;
        let periods = vec![PeriodConfig::new(now - 24 * HOUR, IndexType::BoltdbShipper)];

        let range = plan_store_query(false, Duration::ZERO, &periods, now - 48 * HOUR, now, now)
            .unwrap();
        assert_eq!(range.start, now - 24 * HOUR);
    }

    #[test]
    fn test_plan_disabled_without_shipper() {
        let now = 100 * HOUR;
        let periods = vec![PeriodConfig::new(now - 24 * HOUR, IndexType::Bigtable)];
        assert!(plan_store_query(false, Duration::ZERO, &periods, 0, now, now).is_none());
    }

    #[test]
    fn test_future_shipper_period_clamps_to_zero() {
        let now = 100 * HOUR;
        let periods = vec![PeriodConfig::new(now + HOUR, IndexType::BoltdbShipper)];
        assert_eq!(shipper_max_look_back(&periods, now), Duration::ZERO);
    }
}
