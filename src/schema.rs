//! Schema: an ordered list of typed, named, nullable columns.
//!
//! Built directly on `arrow::datatypes` — the teacher crate already leans on
//! `Schema`/`Field`/`DataType` throughout `query/executor.rs` and `topk.rs`
//! for exactly this purpose, so the execution core reuses the same types
//! rather than inventing a parallel one.

use arrow::datatypes::DataType;
pub use arrow::datatypes::{Field, Schema};
use std::sync::Arc;

/// Shared, cheaply-cloned schema handle threaded through every morsel and
/// operator.
pub type SchemaRef = Arc<Schema>;

/// Returns `true` if `data_type` is one of the logical types the execution
/// core's operators know how to evaluate, hash, compare, and aggregate.
///
/// boolean, int32, int64, float32, float64, decimal(p,s), utf8-string,
/// binary, date32, timestamp-nanos, list-of-T, struct-of-named-fields.
#[must_use]
pub fn is_supported_logical_type(data_type: &DataType) -> bool {
    match data_type {
        DataType::Boolean
        | DataType::Int32
        | DataType::Int64
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Utf8
        | DataType::Binary
        | DataType::Date32
        | DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, _) => true,
        DataType::List(field) => is_supported_logical_type(field.data_type()),
        DataType::Struct(fields) => fields.iter().all(|f| is_supported_logical_type(f.data_type())),
        _ => false,
    }
}

/// Look up a field's index by name, honoring schema-level uniqueness (the
/// planner is responsible for resolving cross-input collisions before a
/// schema reaches the executor, per spec.md §3).
#[must_use]
pub fn field_index(schema: &Schema, name: &str) -> Option<usize> {
    schema.fields().iter().position(|f| f.name() == name)
}
