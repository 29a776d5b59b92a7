//! Top-N selection: bounded-heap throughput against input size and `k`.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use opteryx_core::config::ExecutionConfig;
use opteryx_core::expr::Expr;
use opteryx_core::morsel::Morsel;
use opteryx_core::operators::sort::SortKey;
use opteryx_core::operators::topk::TopK;
use opteryx_core::operators::{Operator, OperatorStats};
use opteryx_core::reader::{Reader, VecReader};
use opteryx_core::schema::SchemaRef;

struct ReaderOperator {
    reader: VecReader,
    stats: OperatorStats,
}

impl Operator for ReaderOperator {
    fn schema(&self) -> &SchemaRef {
        self.reader.schema()
    }
    fn next(&mut self) -> opteryx_core::Result<Option<Morsel>> {
        self.reader.next()
    }
    fn statistics(&self) -> &OperatorStats {
        &self.stats
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("score", DataType::Int32, false)]))
}

fn source(rows: usize) -> Box<dyn Operator> {
    // Reverse order: worst case for a bounded heap (every row is a
    // candidate replacement until the heap fills).
    let values: Vec<i32> = (0..rows as i32).rev().collect();
    let morsel = Morsel::new(schema(), vec![Arc::new(Int32Array::from(values)) as ArrayRef]).unwrap();
    Box::new(ReaderOperator {
        reader: VecReader::new(schema(), vec![morsel]),
        stats: OperatorStats::default(),
    })
}

fn run_topk(rows: usize, k: usize) -> usize {
    let input = source(rows);
    let keys = vec![SortKey {
        expr: Expr::Column(0),
        descending: true,
        nulls_first: false,
    }];
    let mut topk = TopK::new(input, keys, k, ExecutionConfig::default());
    let mut total = 0usize;
    while let Some(m) = topk.next().unwrap() {
        total += m.row_count();
    }
    total
}

fn bench_topk_by_input_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("topk_input_size");
    for size in [10_000usize, 100_000, 1_000_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| black_box(run_topk(size, 100)));
        });
    }
    group.finish();
}

fn bench_topk_by_k(c: &mut Criterion) {
    let mut group = c.benchmark_group("topk_k");
    for k in [10usize, 1_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            b.iter(|| black_box(run_topk(200_000, k)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_topk_by_input_size, bench_topk_by_k);
criterion_main!(benches);
