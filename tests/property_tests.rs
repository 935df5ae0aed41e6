//! Property-based tests for invariants using proptest
//!
//! - Windows never exceed their capacity
//! - Appended windows stay strictly ordered by timestamp
//! - Seeding keeps exactly the newest points
//! - Trend is only reported from 24 points on

use apiary_telemetry::{
    stats::{TREND_LOOKBACK, Trend, summarize},
    window::{MetricWindow, Sample},
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

fn at(second: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(second)
}

// Property: append never grows a window past its capacity
proptest! {
    #[test]
    fn prop_append_respects_capacity(
        capacity in 1usize..64,
        offsets in prop::collection::vec(0i64..500, 0..200),
    ) {
        let mut window = MetricWindow::new(capacity);
        for (i, offset) in offsets.iter().enumerate() {
            let _ = window.append(Sample::new(at(*offset), i as f64));
            prop_assert!(window.len() <= capacity);
        }
    }
}

// Property: whatever order events arrive in, the window stays strictly increasing
proptest! {
    #[test]
    fn prop_append_keeps_strict_order(
        offsets in prop::collection::vec(0i64..100, 1..100),
    ) {
        let mut window = MetricWindow::new(50);
        for offset in offsets {
            let before = window.len();
            let last = window.last().map(|s| s.timestamp);
            let result = window.append(Sample::new(at(offset), 1.0));

            match last {
                Some(last) if at(offset) <= last => {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(window.len(), before);
                }
                _ => prop_assert!(result.is_ok()),
            }
        }

        let timestamps: Vec<_> = window.points().map(|s| s.timestamp).collect();
        prop_assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

// Property: seed keeps the newest `capacity` points in order
proptest! {
    #[test]
    fn prop_seed_keeps_newest(
        capacity in 1usize..64,
        offsets in prop::collection::vec(0i64..10_000, 0..150),
    ) {
        let mut window = MetricWindow::new(capacity);
        window.seed(offsets.iter().map(|o| Sample::new(at(*o), *o as f64)));

        let mut expected = offsets.clone();
        expected.sort();
        let expected: Vec<i64> = expected
            .iter()
            .skip(expected.len().saturating_sub(capacity))
            .copied()
            .collect();

        let kept: Vec<i64> = window.values().map(|v| v as i64).collect();
        prop_assert_eq!(kept, expected);
    }
}

// Property: trend is NotApplicable below two lookbacks and a delta from there on
proptest! {
    #[test]
    fn prop_trend_threshold(
        values in prop::collection::vec(-50.0f64..50.0, 0..60),
    ) {
        let mut window = MetricWindow::new(100);
        window.seed(values.iter().enumerate().map(|(i, v)| Sample::new(at(i as i64), *v)));

        let summary = summarize(&window);
        if values.len() < 2 * TREND_LOOKBACK {
            prop_assert_eq!(summary.trend, Trend::NotApplicable);
        } else {
            prop_assert!(matches!(summary.trend, Trend::Delta(_)));
        }

        if let (Some(min), Some(max), Some(avg)) = (summary.min, summary.max, summary.avg) {
            prop_assert!(min <= avg + 1e-9 && avg <= max + 1e-9);
        }
    }
}
