//! Cross-module behavioral scenarios: a small operator tree end to end.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};

use opteryx_core::config::ExecutionConfig;
use opteryx_core::expr::{BinaryOp, Expr, ScalarValue};
use opteryx_core::morsel::Morsel;
use opteryx_core::operators::aggregate::{AggregateFunction, AggregateSpec, GroupedAggregate};
use opteryx_core::operators::join::{HashJoin, JoinType};
use opteryx_core::operators::simple::{Distinct, Filter, Limit};
use opteryx_core::operators::sort::{Sort, SortKey};
use opteryx_core::operators::topk::TopK;
use opteryx_core::operators::Operator;
use opteryx_core::reader::{ReaderAdapter, VecReader};
use opteryx_core::schema::SchemaRef;

fn orders_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("customer_id", DataType::Int32, false),
        Field::new("amount", DataType::Int32, false),
    ]))
}

fn customers_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("name", DataType::Utf8, false),
    ]))
}

fn orders(customer_ids: Vec<i32>, amounts: Vec<i32>) -> Box<dyn Operator> {
    let morsel = Morsel::new(
        orders_schema(),
        vec![
            Arc::new(Int32Array::from(customer_ids)) as ArrayRef,
            Arc::new(Int32Array::from(amounts)) as ArrayRef,
        ],
    )
    .unwrap();
    Box::new(ReaderAdapter::new(VecReader::new(orders_schema(), vec![morsel])))
}

fn customers(ids: Vec<i32>, names: Vec<&str>) -> Box<dyn Operator> {
    let morsel = Morsel::new(
        customers_schema(),
        vec![
            Arc::new(Int32Array::from(ids)) as ArrayRef,
            Arc::new(StringArray::from(names)) as ArrayRef,
        ],
    )
    .unwrap();
    Box::new(ReaderAdapter::new(VecReader::new(customers_schema(), vec![morsel])))
}

fn collect_all(op: &mut dyn Operator) -> Vec<Morsel> {
    let mut out = Vec::new();
    while let Some(m) = op.next().unwrap() {
        out.push(m);
    }
    out
}

#[test]
fn inner_join_duplicates_on_both_sides() {
    // Two customer-1 orders joined against two customer-1 rows should
    // produce the cartesian product of the matching groups: 2 * 2 = 4.
    let build = customers(vec![1, 1, 2], vec!["a", "a-dup", "b"]);
    let probe = orders(vec![1, 1], vec![100, 200]);

    let mut join = HashJoin::new(
        build,
        probe,
        vec![Expr::Column(0)],
        vec![Expr::Column(0)],
        JoinType::Inner,
        ExecutionConfig::default(),
    );
    let total: usize = collect_all(&mut join).iter().map(Morsel::row_count).sum();
    assert_eq!(total, 4);
}

#[test]
fn left_outer_join_preserves_unmatched_build_rows() {
    // The build side is the preserved ("left") side: unmatched build rows
    // are emitted once, with nulls for every probe column.
    let build = customers(vec![1, 2, 3], vec!["a", "b", "c"]);
    let probe = orders(vec![1], vec![100]);

    let mut join = HashJoin::new(
        build,
        probe,
        vec![Expr::Column(0)],
        vec![Expr::Column(0)],
        JoinType::LeftOuter,
        ExecutionConfig::default(),
    );
    let total: usize = collect_all(&mut join).iter().map(Morsel::row_count).sum();
    // 1 matched row (customer 1) + 2 unmatched build rows (2, 3).
    assert_eq!(total, 3);
}

#[test]
fn grouped_aggregation_handles_null_group_keys() {
    let schema: SchemaRef = Arc::new(Schema::new(vec![
        Field::new("group", DataType::Int32, true),
        Field::new("value", DataType::Int32, false),
    ]));
    let morsel = Morsel::new(
        schema.clone(),
        vec![
            Arc::new(Int32Array::from(vec![Some(1), None, Some(1), None])) as ArrayRef,
            Arc::new(Int32Array::from(vec![10, 20, 30, 40])) as ArrayRef,
        ],
    )
    .unwrap();
    let input: Box<dyn Operator> = Box::new(ReaderAdapter::new(VecReader::new(schema, vec![morsel])));

    let specs = vec![AggregateSpec {
        function: AggregateFunction::Sum,
        input: Some(Expr::Column(1)),
        input_type: DataType::Int32,
        filter: None,
        alias: "total".to_string(),
    }];
    let mut agg = GroupedAggregate::new(
        input,
        vec![Expr::Column(0)],
        vec![DataType::Int32],
        specs,
        opteryx_core::config::NumericMode::Lenient,
        opteryx_core::config::CountDistinctMode::Exact,
    );
    let out = collect_all(&mut agg);
    let total_rows: usize = out.iter().map(Morsel::row_count).sum();
    // NULL is its own group, distinct from group 1: two groups total.
    assert_eq!(total_rows, 2);
}

#[test]
fn topk_ties_still_return_exactly_k_rows() {
    let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new("score", DataType::Int32, false)]));
    let morsel = Morsel::new(schema.clone(), vec![Arc::new(Int32Array::from(vec![5; 20])) as ArrayRef]).unwrap();
    let input: Box<dyn Operator> = Box::new(ReaderAdapter::new(VecReader::new(schema, vec![morsel])));

    let keys = vec![SortKey {
        expr: Expr::Column(0),
        descending: true,
        nulls_first: false,
    }];
    let mut topk = TopK::new(input, keys, 5, ExecutionConfig::default());
    let total: usize = collect_all(&mut topk).iter().map(Morsel::row_count).sum();
    assert_eq!(total, 5);
}

#[test]
fn three_valued_filter_excludes_nulls() {
    let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]));
    let morsel = Morsel::new(
        schema.clone(),
        vec![Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])) as ArrayRef],
    )
    .unwrap();
    let input: Box<dyn Operator> = Box::new(ReaderAdapter::new(VecReader::new(schema, vec![morsel])));

    // `v > 0` is NULL (not true) for the NULL row, so it's excluded —
    // three-valued logic, not a NULL-as-false shortcut.
    let predicate = Expr::Binary(
        BinaryOp::Gt,
        Box::new(Expr::Column(0)),
        Box::new(Expr::Literal(ScalarValue::Int32(0))),
    );
    let mut filter = Filter::new(input, predicate);
    let total: usize = collect_all(&mut filter).iter().map(Morsel::row_count).sum();
    assert_eq!(total, 2);
}

#[test]
fn sort_then_distinct_then_limit_composes() {
    let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
    let morsel = Morsel::new(
        schema.clone(),
        vec![Arc::new(Int32Array::from(vec![3, 1, 2, 1, 3, 2])) as ArrayRef],
    )
    .unwrap();
    let input: Box<dyn Operator> = Box::new(ReaderAdapter::new(VecReader::new(schema, vec![morsel])));

    let keys = vec![SortKey {
        expr: Expr::Column(0),
        descending: false,
        nulls_first: false,
    }];
    let sorted: Box<dyn Operator> = Box::new(Sort::new(input, keys, ExecutionConfig::default()));
    let distinct: Box<dyn Operator> = Box::new(Distinct::new(sorted, vec![Expr::Column(0)]));
    let mut limited = Limit::new(distinct, 2);

    let out = collect_all(&mut limited);
    let mut values = Vec::new();
    for m in &out {
        let col = m.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        for i in 0..col.len() {
            values.push(col.value(i));
        }
    }
    assert_eq!(values, vec![1, 2]);
}
