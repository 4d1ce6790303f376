//! Data store: lookups, loading and aggregate invariants.

use sar_desk_core::{
    data_store::DataStore,
    dataset::{parse_state_data, CategoryKind, Categories, DataSource, LabelValue, StateRecord},
    error::DeskError,
};
use std::collections::BTreeMap;

fn sample_records() -> Vec<StateRecord> {
    vec![
        StateRecord::new("CA", "California", vec![2020, 2021], vec![300_000, 310_000]),
        StateRecord::new("NY", "New York", vec![2020, 2021], vec![250_000, 260_000]),
        StateRecord::new("TX", "Texas", vec![2019, 2020, 2021], vec![150_000, 160_000, 170_000]),
        StateRecord::new("FL", "Florida", vec![2020], vec![100_000]),
    ]
}

#[test]
fn exact_counts_for_present_pairs_and_none_for_absent() {
    let store = DataStore::with_records(sample_records());

    assert_eq!(store.get_year_value("CA", 2020).unwrap(), Some(300_000));
    assert_eq!(store.get_year_value("california", 2021).unwrap(), Some(310_000));
    assert_eq!(store.get_year_value("ca", 2020).unwrap(), Some(300_000));
    assert_eq!(store.get_year_value("CA", 2022).unwrap(), None);
    assert_eq!(store.get_year_value("Ohio", 2020).unwrap(), None);
}

#[test]
fn blank_keys_are_malformed_input() {
    let store = DataStore::with_records(sample_records());
    let err = store.get_year_value("  ", 2020).unwrap_err();
    assert!(matches!(err, DeskError::MalformedInput { .. }), "got {err:?}");
    assert!(store.get_by_name_or_code("").is_err());
    assert!(store.compare("CA", " ").is_err());
}

#[test]
fn load_is_idempotent_on_the_aggregate_view() {
    let store = DataStore::new();
    assert!(store.load(sample_records()));
    let first = store.snapshot().aggregate().clone();
    assert!(store.load(sample_records()));
    let second = store.snapshot().aggregate().clone();
    assert_eq!(first, second);
    assert_eq!(second.grand_total(), 1_700_000);
    assert_eq!(second.totals_by_year.get(&2020), Some(&810_000));
}

#[test]
fn top_states_is_bounded_non_increasing_and_stable() {
    let mut records = sample_records();
    // Same total as Florida; loaded later, so ranked after it.
    records.push(StateRecord::new("NV", "Nevada", vec![2020], vec![100_000]));
    let store = DataStore::with_records(records);

    for n in 0..8 {
        assert_eq!(store.top_states(n).len(), n.min(5));
    }
    let top = store.top_states(5);
    assert!(top.windows(2).all(|w| w[0].total >= w[1].total));
    let codes: Vec<&str> = top.iter().map(|s| s.code.as_str()).collect();
    assert_eq!(codes, vec!["CA", "NY", "TX", "FL", "NV"]);
}

#[test]
fn ranking_for_one_year_leaves_out_states_without_it() {
    let store = DataStore::with_records(sample_records());
    let top = store.top_states_in_year(2019, 5);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].code, "TX");
    assert_eq!(top[0].total, 150_000);
}

#[test]
fn invalid_records_are_skipped_and_an_all_invalid_load_keeps_old_data() {
    let store = DataStore::new();
    let mut records = sample_records();
    records.push(StateRecord::new("OH", "Ohio", vec![2020, 2021], vec![1]));
    records.push(StateRecord::new("CA", "California again", vec![2020], vec![1]));
    assert!(store.load(records));
    assert_eq!(store.snapshot().state_count(), 4);
    assert_eq!(store.get_year_value("CA", 2020).unwrap(), Some(300_000));

    let bad = vec![StateRecord::new("OH", "Ohio", vec![2021, 2020], vec![1, 2])];
    assert!(!store.load(bad));
    assert!(!store.load(Vec::new()));
    assert_eq!(store.snapshot().state_count(), 4);
}

#[test]
fn compare_reports_per_year_and_total_differences() {
    let store = DataStore::with_records(sample_records());
    let cmp = store.compare("CA", "Texas").unwrap().unwrap();
    assert_eq!(cmp.left.name, "California");
    assert_eq!(cmp.right.code, "TX");
    assert_eq!(cmp.total_difference, 610_000 - 480_000);

    let years: Vec<i32> = cmp.per_year.iter().map(|d| d.year).collect();
    assert_eq!(years, vec![2019, 2020, 2021]);
    assert_eq!(cmp.per_year[0].left, None);
    assert_eq!(cmp.per_year[0].difference(), None);
    assert_eq!(cmp.per_year[1].difference(), Some(140_000));

    assert!(store.compare("CA", "Ohio").unwrap().is_none());
}

#[test]
fn year_detail_includes_that_years_months() {
    let mut ca = StateRecord::new("CA", "California", vec![2020, 2021], vec![300_000, 310_000]);
    ca.monthly = BTreeMap::from([
        ("2020-01".to_string(), 25_000),
        ("2020-02".to_string(), 24_000),
        ("2021-01".to_string(), 26_000),
    ]);
    let store = DataStore::with_records(vec![ca]);
    let detail = store.get_year_detail("CA", 2020).unwrap().unwrap();
    assert_eq!(detail.count, 300_000);
    assert_eq!(detail.months.len(), 2);
    assert_eq!(detail.months[0], ("2020-01".to_string(), 25_000));
}

#[test]
fn category_rankings_sum_across_states() {
    let mut ca = StateRecord::new("CA", "California", vec![2020], vec![10]);
    ca.categories = Categories {
        activities: vec![
            LabelValue { label: "Structuring".into(), value: 40 },
            LabelValue { label: "Identity theft".into(), value: 30 },
        ],
        ..Categories::default()
    };
    let mut tx = StateRecord::new("TX", "Texas", vec![2020], vec![5]);
    tx.categories.activities = vec![LabelValue { label: "Identity theft".into(), value: 20 }];
    let store = DataStore::with_records(vec![ca, tx]);

    let top = store.top_categories(CategoryKind::Activities, 5);
    assert_eq!(top[0], LabelValue { label: "Identity theft".into(), value: 50 });
    assert_eq!(top[1].label, "Structuring");
    assert!(store.top_categories(CategoryKind::Products, 5).is_empty());
}

#[test]
fn monthly_series_survives_a_reload_and_refresh_is_stable() {
    let store = DataStore::with_records(sample_records());
    assert!(store.load_monthly(BTreeMap::from([("2020-01".to_string(), 70_000)])));
    assert!(!store.load_monthly(BTreeMap::new()));
    assert!(store.load_from(sample_records(), DataSource::Live { path: "x.json".into() }));

    let dataset = store.snapshot();
    assert_eq!(dataset.monthly().get("2020-01"), Some(&70_000));
    assert_eq!(dataset.source(), &DataSource::Live { path: "x.json".into() });
    assert!(store.refresh());
}

#[test]
fn huge_counts_saturate_and_an_overflowing_record_is_skipped() {
    let json = r#"{
        "AA": {"name": "Alpha", "years": [2020], "counts": [9223372036854775807]},
        "BB": {"name": "Beta",  "years": [2020], "counts": [9223372036854775807]},
        "CC": {"name": "Gamma", "years": [2020], "counts": [9223372036854775807]}
    }"#;
    let records = parse_state_data(json).unwrap();
    assert_eq!(records.len(), 3);

    let store = DataStore::with_records(records);
    assert_eq!(store.total_for_year(2020), Some(u64::MAX));
    assert_eq!(store.snapshot().aggregate().grand_total(), u64::MAX);
    assert_eq!(store.top_states(1)[0].total, 9_223_372_036_854_775_807);

    let overflowing = StateRecord::new("DD", "Delta", vec![2020, 2021], vec![u64::MAX, 1]);
    assert!(overflowing.validate().is_err());
    assert!(!store.load(vec![overflowing]));
    assert_eq!(store.snapshot().state_count(), 3);
}
