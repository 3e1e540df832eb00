//! Store query planning cases

use std::time::Duration;
use tributary::ingester::planner::{build_store_request, plan_store_query, shipper_max_look_back};
use tributary::storage::{now_nanos, TimeRange, Timestamp, NANOS_PER_MILLI};
use tributary::store::{IndexType, PeriodConfig};

const MINUTE: i64 = 60_000 * NANOS_PER_MILLI;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

#[test]
fn test_build_store_request() {
    let now = now_nanos();

    struct Case {
        name: &'static str,
        query_store: bool,
        max_look_back: Duration,
        start: Timestamp,
        end: Timestamp,
        expected: Option<TimeRange>,
    }

    let cases = [
        Case {
            name: "do not query store",
            query_store: false,
            max_look_back: Duration::ZERO,
            start: now - MINUTE,
            end: now,
            expected: None,
        },
        Case {
            name: "look-back covers the whole request",
            query_store: true,
            max_look_back: Duration::from_secs(10 * 60),
            start: now - 5 * MINUTE,
            end: now,
            expected: Some(TimeRange::new(now - 5 * MINUTE, now)),
        },
        Case {
            name: "look-back covers part of the request",
            query_store: true,
            max_look_back: Duration::from_secs(10 * 60),
            start: now - HOUR,
            end: now,
            expected: Some(TimeRange::new(now - 10 * MINUTE, now)),
        },
        Case {
            name: "look-back does not cover the request",
            query_store: true,
            max_look_back: Duration::from_secs(10 * 60),
            start: now - HOUR,
            end: now - 20 * MINUTE,
            expected: None,
        },
    ];

    for case in cases {
        let got = build_store_request(case.query_store, case.max_look_back, case.start, case.end, now);
        assert_eq!(got, case.expected, "{}", case.name);
    }
}

#[test]
fn test_shipper_max_look_back() {
    let now = now_nanos();
    let since = |from: Timestamp| Duration::from_nanos((now - from) as u64);

    struct Case {
        name: &'static str,
        periods: Vec<PeriodConfig>,
        expected: Duration,
    }

    let cases = [
        Case {
            name: "no shipped index",
            periods: vec![PeriodConfig::new(now - DAY, IndexType::Bigtable)],
            expected: Duration::ZERO,
        },
        Case {
            name: "single shipped period",
            periods: vec![PeriodConfig::new(now - DAY, IndexType::BoltdbShipper)],
            expected: since(now - DAY),
        },
        Case {
            name: "shipped after another index",
            periods: vec![
                PeriodConfig::new(now - 10 * DAY, IndexType::Bigtable),
                PeriodConfig::new(now - DAY, IndexType::BoltdbShipper),
            ],
            expected: since(now - DAY),
        },
        Case {
            name: "two shipped periods",
            periods: vec![
                PeriodConfig::new(now - 20 * DAY, IndexType::BoltdbShipper),
                PeriodConfig::new(now - 10 * DAY, IndexType::BoltdbShipper),
            ],
            expected: since(now - 20 * DAY),
        },
        Case {
            name: "active period not shipped",
            periods: vec![
                PeriodConfig::new(now - 20 * DAY, IndexType::BoltdbShipper),
                PeriodConfig::new(now - 10 * DAY, IndexType::Bigtable),
            ],
            expected: Duration::ZERO,
        },
    ];

    for case in cases {
        let got = shipper_max_look_back(&case.periods, now);
        let diff = if got > case.expected {
            got - case.expected
        } else {
            case.expected - got
        };
        assert!(diff <= Duration::from_secs(1), "{}: got {:?}", case.name, got);
    }
}

#[test]
fn test_plan_prefers_shipper_look_back() {
    let now = now_nanos();
    let periods = vec![PeriodConfig::new(now - HOUR, IndexType::BoltdbShipper)];

    // The configured look-back is replaced by the shipper's
    let range = plan_store_query(
        true,
        Duration::from_secs(60),
        &periods,
        now - DAY,
        now,
        now,
    )
    .unwrap();
    assert_eq!(range, TimeRange::new(now - HOUR, now));

    // Without a shipped index the configured look-back applies
    let periods = vec![PeriodConfig::new(now - HOUR, IndexType::Cassandra)];
    let range = plan_store_query(true, Duration::from_secs(60), &periods, now - DAY, now, now)
        .unwrap();
    assert_eq!(range, TimeRange::new(now - MINUTE, now));
}
