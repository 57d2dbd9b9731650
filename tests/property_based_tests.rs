//! Property-based tests for hashing, aggregation and form parsing
//!
//! Core properties:
//! 1. Parameter hashing is a function of value, not of representation
//! 2. Aggregation preserves counts and totals
//! 3. Statistics stay within bounds
//! 4. Groups come out ordered by total time
//! 5. Control form parsing never panics

use proptest::prelude::*;
use querytap::aggregate::aggregate;
use querytap::control::ControlCommand;
use querytap::params::{params_hash, ParamValue, Params};
use querytap::record::ExecutionRecord;
use std::collections::BTreeMap;
use std::time::Duration;

fn param_value() -> impl Strategy<Value = ParamValue> {
    let leaf = prop_oneof![
        Just(ParamValue::Null),
        any::<bool>().prop_map(ParamValue::Bool),
        any::<i64>().prop_map(ParamValue::Int),
        (-1.0e6f64..1.0e6).prop_map(ParamValue::Float),
        "[a-z0-9 ]{0,12}".prop_map(ParamValue::Text),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(ParamValue::List),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4).prop_map(ParamValue::Map),
        ]
    })
}

/// Rebuild `value` element by element, flipping the sign of zeros and
/// swapping NaN payloads so the copy differs bit-wise where equality allows
fn rebuild(value: &ParamValue) -> ParamValue {
    match value {
        ParamValue::Null => ParamValue::Null,
        ParamValue::Bool(b) => ParamValue::Bool(*b),
        ParamValue::Int(i) => ParamValue::Int(*i),
        ParamValue::Float(f) if *f == 0.0 => ParamValue::Float(-*f),
        ParamValue::Float(f) if f.is_nan() => ParamValue::Float(f64::from_bits(0x7ff8_0000_0000_0001)),
        ParamValue::Float(f) => ParamValue::Float(*f),
        ParamValue::Text(s) => ParamValue::Text(s.as_str().to_owned()),
        ParamValue::List(items) => {
            let mut rebuilt = Vec::new();
            for item in items {
                rebuilt.push(rebuild(item));
            }
            ParamValue::List(rebuilt)
        }
        ParamValue::Map(entries) => {
            let mut rebuilt = BTreeMap::new();
            for (key, item) in entries.iter().rev() {
                rebuilt.insert(key.clone(), rebuild(item));
            }
            ParamValue::Map(rebuilt)
        }
    }
}

fn records() -> impl Strategy<Value = Vec<ExecutionRecord>> {
    prop::collection::vec((0usize..6, 0u64..50_000, prop::option::of(0u64..100)), 0..60).prop_map(
        |rows| {
            rows.into_iter()
                .map(|(query, micros, rowcount)| {
                    let builder = ExecutionRecord::builder(format!("SELECT * FROM t{}", query))
                        .duration(Duration::from_micros(micros));
                    match rowcount {
                        Some(n) => builder.rowcount(n).build(),
                        None => builder.build(),
                    }
                })
                .collect()
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_params_hash_deterministic(values in prop::collection::vec(param_value(), 0..6)) {
        let params = Params::Positional(values);
        prop_assert_eq!(params_hash(&params), params_hash(&params.clone()));
    }

    #[test]
    fn prop_params_hash_equal_for_independently_built_values(
        values in prop::collection::vec(
            prop_oneof![
                param_value(),
                Just(ParamValue::Float(0.0)),
                Just(ParamValue::Float(f64::NAN)),
                Just(ParamValue::List(vec![ParamValue::Float(-0.0), ParamValue::Float(f64::NAN)])),
            ],
            0..6,
        ),
    ) {
        let original = Params::Positional(values.clone());
        let rebuilt = Params::Positional(values.iter().map(rebuild).collect());
        prop_assert_eq!(params_hash(&original), params_hash(&rebuilt));

        let named = |vals: Vec<ParamValue>| {
            Params::Named(vals.into_iter().enumerate().map(|(i, v)| (format!("p{}", i), v)).collect())
        };
        let rebuilt_named = named(values.iter().map(rebuild).collect());
        prop_assert_eq!(params_hash(&named(values)), params_hash(&rebuilt_named));
    }

    #[test]
    fn prop_named_params_hash_ignores_insertion_order(
        entries in prop::collection::btree_map("[a-z]{1,6}", param_value(), 0..6),
    ) {
        let forward: BTreeMap<String, ParamValue> = entries.clone().into_iter().collect();
        let reversed: BTreeMap<String, ParamValue> = entries.into_iter().rev().collect();
        prop_assert_eq!(
            params_hash(&Params::Named(forward)),
            params_hash(&Params::Named(reversed))
        );
    }

    #[test]
    fn prop_aggregate_preserves_counts(records in records()) {
        let total = records.len();
        let sum: Duration = records.iter().map(|r| r.duration()).sum();
        let rows: u64 = records.iter().filter_map(|r| r.rowcount).sum();
        let report = aggregate(records);

        prop_assert_eq!(report.total_queries(), total);
        prop_assert_eq!(report.groups.iter().map(|g| g.count()).sum::<usize>(), total);
        prop_assert_eq!(report.total_time(), sum);
        prop_assert_eq!(report.all.rowcounts, rows);
    }

    #[test]
    fn prop_statistics_within_bounds(records in records()) {
        let report = aggregate(records);
        for group in report.groups.iter().chain(std::iter::once(&report.all)) {
            if group.is_empty() {
                continue;
            }
            prop_assert!(group.min <= group.max);
            prop_assert!(group.min <= group.mean && group.mean <= group.max);
            prop_assert!(group.min <= group.median && group.median <= group.max);
            prop_assert!(group.sum >= group.max);
        }
    }

    #[test]
    fn prop_groups_ordered_by_total_time(records in records()) {
        let report = aggregate(records);
        for pair in report.groups.windows(2) {
            prop_assert!(pair[0].sum >= pair[1].sum);
        }
    }

    #[test]
    fn prop_parse_form_never_panics(body in "[a-z=&%0-9]{0,32}") {
        let _ = ControlCommand::parse_form(&body);
    }
}
