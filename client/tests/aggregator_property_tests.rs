// Property-based tests for aggregate measurement bucketing

use client::agent::Aggregator;
use proptest::prelude::*;
use std::collections::HashMap;

fn values_with(value: f64) -> HashMap<String, f64> {
    HashMap::from([("v".to_string(), value)])
}

proptest! {
    /// *For any* set of measurements for one metric, the accumulated sum
    /// across all minute buckets equals the plain sum of the inputs.
    #[test]
    fn property_accumulation_preserves_totals(
        samples in prop::collection::vec((0i64..100_000, -1000.0f64..1000.0), 1..50),
    ) {
        let mut aggregator = Aggregator::new();
        for (timestamp, value) in &samples {
            aggregator.add_measurement("digest", "name", *timestamp, values_with(*value));
        }

        let expected: f64 = samples.iter().map(|(_, value)| value).sum();
        let accumulated: f64 = aggregator
            .serialize()
            .measurements
            .values()
            .flatten()
            .map(|record| record.fields.get("v").copied().unwrap_or(0.0))
            .sum();

        prop_assert!((accumulated - expected).abs() <= 1e-6 * (1.0 + expected.abs()));
    }

    /// *For any* timestamp, its bucket is the minute that contains it.
    #[test]
    fn property_bucket_contains_its_timestamp(timestamp in 0i64..10_000_000) {
        let mut aggregator = Aggregator::new();
        aggregator.add_measurement("digest", "name", timestamp, values_with(1.0));

        let payload = aggregator.serialize();
        prop_assert_eq!(payload.measurements.len(), 1);

        let minute = *payload.measurements.keys().next().unwrap();
        prop_assert_eq!(minute % 60, 0);
        prop_assert!(minute <= timestamp && timestamp < minute + 60);
    }

    /// *For any* mix of metrics within one minute, each digest/name pair
    /// gets exactly one flattened record.
    #[test]
    fn property_one_record_per_metric_per_minute(
        digests in prop::collection::vec("[a-f0-9]{4}", 1..10),
        repeats in 1usize..4,
    ) {
        let mut aggregator = Aggregator::new();
        for _ in 0..repeats {
            for digest in &digests {
                aggregator.add_measurement(digest, "name", 1210, values_with(1.0));
            }
        }

        let distinct: std::collections::HashSet<&String> = digests.iter().collect();
        let payload = aggregator.serialize();
        let records = payload.measurements.get(&1200).unwrap();

        prop_assert_eq!(records.len(), distinct.len());
        for record in records {
            let occurrences = digests.iter().filter(|d| **d == record.digest).count();
            let expected = (repeats * occurrences) as f64;
            let accumulated = record.fields.get("v").copied().unwrap_or(0.0);
            prop_assert!((accumulated - expected).abs() < 1e-9);
        }
    }
}
