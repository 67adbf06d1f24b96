use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow_schema::{DataType, Field, Schema};
use medctx_execution::apply_filters;
use medctx_planner::{CohortFilter, FilterSpec};
use serde_json::json;

mod support;

use support::{
    column_names, context, fixture, fixture_with_cohort, full_record, plan, unique_dir,
    write_parquet, CountingSeriesDecoder,
};

#[test]
fn available_entities_is_the_intersection() {
    let dir = unique_dir("medctx_intersection");
    let cohort = dir.join("clinical.parquet");
    write_parquet(
        &cohort,
        Arc::new(Schema::new(vec![
            Field::new("caseid", DataType::Utf8, false),
            Field::new("age", DataType::Int64, false),
        ])),
        vec![
            Arc::new(StringArray::from(vec!["A", "B", "C"])),
            Arc::new(Int64Array::from(vec![30_i64, 40, 50])),
        ],
    );
    let fx = fixture_with_cohort(dir, &cohort, &["D", "C", "B"], &[0.0]);
    let mut ctx = context(&fx, Arc::new(CountingSeriesDecoder::default()));
    ctx.load_from_json(&plan(json!([]), &["HR"], full_record()))
        .expect("load plan");

    let first = ctx.available_entities().expect("entities");
    assert_eq!(first, vec!["B".to_string(), "C".to_string()]);
    assert_eq!(ctx.available_entities().expect("again"), first);

    let dict = ctx.get_signals_dict(None, None, true).expect("signals");
    assert_eq!(dict.keys().cloned().collect::<Vec<_>>(), first);
}

#[test]
fn integer_cohort_ids_match_file_name_ids() {
    let fx = fixture("medctx_int_ids", &["2", "4", "6"], &[0.0]);
    let mut ctx = context(&fx, Arc::new(CountingSeriesDecoder::default()));
    ctx.load_from_json(&plan(json!([]), &["HR"], full_record()))
        .expect("load plan");
    assert_eq!(ctx.available_entities().expect("entities"), vec!["2", "4"]);
}

#[test]
fn cohort_filters_compose_in_plan_order() {
    let fx = fixture("medctx_filters", &["1", "2", "3", "4", "5"], &[0.0]);
    let filters = json!([
        {"column": "age", "operator": ">", "value": 60},
        {"column": "department", "operator": "=", "value": "GS"}
    ]);
    let mut ctx = context(&fx, Arc::new(CountingSeriesDecoder::default()));
    ctx.load_from_json(&plan(filters.clone(), &["HR"], full_record()))
        .expect("load plan");
    let through_context = ctx.get_cohort(None).expect("filtered");

    let mut unfiltered_ctx = context(&fx, Arc::new(CountingSeriesDecoder::default()));
    unfiltered_ctx
        .load_from_json(&plan(json!([]), &["HR"], full_record()))
        .expect("load plan");
    let raw = unfiltered_ctx.get_cohort(None).expect("raw");
    assert_eq!(raw.num_rows(), 5);

    let specs: Vec<FilterSpec> = serde_json::from_value(filters).expect("filter specs");
    let mut by_hand = raw.clone();
    for spec in &specs {
        let f = CohortFilter::from_spec(spec).expect("filter");
        by_hand = apply_filters(&by_hand, std::slice::from_ref(&f));
    }
    assert_eq!(through_context, by_hand);
    assert_eq!(through_context.num_rows(), 1);
    assert_eq!(
        ctx.available_entities().expect("entities"),
        vec!["3".to_string()]
    );
}

#[test]
fn membership_range_and_pattern_filters() {
    let fx = fixture("medctx_filter_ops", &["1"], &[0.0]);
    let cases = [
        (json!([{"column": "department", "operator": "in", "value": ["GS", "TS"]}]), 3),
        (json!([{"column": "age", "operator": "between", "value": [50, 70]}]), 3),
        (json!([{"column": "department", "operator": "like", "value": "%S"}]), 5),
        (json!([{"column": "department", "op": "!=", "value": "GS"}]), 3),
        (json!([{"column": "no_such_column", "operator": "=", "value": 1}]), 5),
    ];
    for (filters, expected) in cases {
        let mut ctx = context(&fx, Arc::new(CountingSeriesDecoder::default()));
        ctx.load_from_json(&plan(filters.clone(), &["HR"], full_record()))
            .expect("load plan");
        let cohort = ctx.get_cohort(None).expect("cohort");
        assert_eq!(cohort.num_rows(), expected, "filters {filters}");
        assert_eq!(column_names(&cohort).len(), 5);
    }
}
