//! Sort spill file format (`OPSP`), per spec.md §6.
//!
//! Layout: a 16-byte header (`magic[4]="OPSP"`, `version:u32`,
//! `row_count:u64`), followed by one section per column
//! (`type_id:u32`, `byte_length:u64`, raw bytes, null bitmap). Spill files
//! are temporary: [`crate::operators::sort::Sort`] deletes them on close
//! or cancellation.
//!
//! Supports the fixed-width primitive types a sort key or row payload
//! realistically carries (`Boolean`/`Int32`/`Int64`/`Float32`/`Float64`/
//! `Date32`/timestamp-nanos) plus `Utf8`, which packs its offsets buffer
//! ahead of its data buffer inside one section rather than needing a
//! second section — the format only constrains section boundaries, not a
//! type's internal byte layout.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::buffer::{Buffer, NullBuffer};
use arrow::datatypes::DataType;

use crate::error::{Error, Result};
use crate::morsel::Morsel;
use crate::schema::SchemaRef;

const MAGIC: [u8; 4] = *b"OPSP";
const VERSION: u32 = 1;

fn type_id(data_type: &DataType) -> Result<u32> {
    Ok(match data_type {
        DataType::Boolean => 1,
        DataType::Int32 => 2,
        DataType::Int64 => 3,
        DataType::Float32 => 4,
        DataType::Float64 => 5,
        DataType::Utf8 => 6,
        DataType::Date32 => 7,
        DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, _) => 8,
        other => {
            return Err(Error::TypeError(format!(
                "spill format does not support {other:?}"
            )))
        }
    });
}

fn data_type_for_id(id: u32) -> Result<DataType> {
    Ok(match id {
        1 => DataType::Boolean,
        2 => DataType::Int32,
        3 => DataType::Int64,
        4 => DataType::Float32,
        5 => DataType::Float64,
        6 => DataType::Utf8,
        7 => DataType::Date32,
        8 => DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, None),
        other => return Err(Error::Other(format!("unknown spill type id {other}"))),
    })
}

/// Write one materialized, schema-homogeneous morsel to `path` as a spill
/// run.
///
/// # Errors
/// Returns [`Error::Io`] on a filesystem failure, or [`Error::TypeError`]
/// if a column's type isn't one the spill format supports.
pub fn write_run(path: &Path, morsel: &Morsel) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(morsel.row_count() as u64).to_le_bytes())?;

    for column in morsel.columns() {
        write_column(&mut writer, column.as_ref())?;
    }
    writer.flush()?;
    Ok(())
}

fn write_column(writer: &mut impl Write, column: &dyn Array) -> Result<()> {
    let id = type_id(column.data_type())?;
    let row_count = column.len();
    let value_bytes = value_bytes(column)?;
    let null_bitmap = null_bitmap_bytes(column);

    let byte_length = (value_bytes.len() + null_bitmap.len()) as u64;
    writer.write_all(&id.to_le_bytes())?;
    writer.write_all(&byte_length.to_le_bytes())?;
    writer.write_all(&value_bytes)?;
    writer.write_all(&null_bitmap)?;
    let _ = row_count;
    Ok(())
}

fn value_bytes(column: &dyn Array) -> Result<Vec<u8>> {
    match column.data_type() {
        DataType::Utf8 => {
            let strings = column
                .as_any()
                .downcast_ref::<arrow::array::StringArray>()
                .expect("type_id matched Utf8");
            let offsets = strings.value_offsets();
            let mut buf = Vec::new();
            buf.extend_from_slice(&(offsets.len() as u64).to_le_bytes());
            for offset in offsets {
                buf.extend_from_slice(&(*offset as i64).to_le_bytes());
            }
            let data = strings.value_data();
            buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
            buf.extend_from_slice(data);
            Ok(buf)
        }
        _ => Ok(column.to_data().buffers()[0].as_slice().to_vec()),
    }
}

fn null_bitmap_bytes(column: &dyn Array) -> Vec<u8> {
    let row_count = column.len();
    let byte_len = row_count.div_ceil(8);
    match column.nulls() {
        Some(nulls) => nulls.buffer().as_slice()[..byte_len].to_vec(),
        None => vec![0xFFu8; byte_len],
    }
}

/// Read a spill run back into a single materialized morsel matching
/// `schema`.
///
/// # Errors
/// Returns [`Error::Io`] on a filesystem failure, or [`Error::Other`] if
/// the file's header doesn't match the expected format.
pub fn read_run(path: &Path, schema: SchemaRef) -> Result<Morsel> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(Error::Other("spill file has an invalid magic".to_string()));
    }
    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    if u32::from_le_bytes(version_bytes) != VERSION {
        return Err(Error::Other("spill file has an unsupported version".to_string()));
    }
    let mut row_count_bytes = [0u8; 8];
    reader.read_exact(&mut row_count_bytes)?;
    let row_count = u64::from_le_bytes(row_count_bytes) as usize;

    let mut columns = Vec::with_capacity(schema.fields().len());
    for _ in schema.fields() {
        columns.push(read_column(&mut reader, row_count)?);
    }

    Morsel::new(schema, columns)
}

fn read_column(reader: &mut impl Read, row_count: usize) -> Result<ArrayRef> {
    let mut id_bytes = [0u8; 4];
    reader.read_exact(&mut id_bytes)?;
    let id = u32::from_le_bytes(id_bytes);
    let data_type = data_type_for_id(id)?;

    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let byte_length = u64::from_le_bytes(len_bytes) as usize;

    let mut section = vec![0u8; byte_length];
    reader.read_exact(&mut section)?;

    let null_byte_len = row_count.div_ceil(8);
    let (value_section, null_section) = section.split_at(section.len() - null_byte_len);
    let null_buffer = NullBuffer::new(arrow::buffer::BooleanBuffer::new(
        Buffer::from(null_section.to_vec()),
        0,
        row_count,
    ));

    build_array(&data_type, value_section, row_count, null_buffer)
}

fn build_array(
    data_type: &DataType,
    value_section: &[u8],
    row_count: usize,
    nulls: NullBuffer,
) -> Result<ArrayRef> {
    use arrow::array::{
        BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array, Int64Array,
        StringArray, TimestampNanosecondArray,
    };

    Ok(match data_type {
        DataType::Boolean => {
            let buffer = arrow::buffer::BooleanBuffer::new(
                Buffer::from(value_section.to_vec()),
                0,
                row_count,
            );
            Arc::new(BooleanArray::new(buffer, Some(nulls)))
        }
        DataType::Int32 => Arc::new(Int32Array::new(
            Buffer::from(value_section.to_vec()).into(),
            Some(nulls),
        )),
        DataType::Int64 => Arc::new(Int64Array::new(
            Buffer::from(value_section.to_vec()).into(),
            Some(nulls),
        )),
        DataType::Float32 => Arc::new(Float32Array::new(
            Buffer::from(value_section.to_vec()).into(),
            Some(nulls),
        )),
        DataType::Float64 => Arc::new(Float64Array::new(
            Buffer::from(value_section.to_vec()).into(),
            Some(nulls),
        )),
        DataType::Date32 => Arc::new(Date32Array::new(
            Buffer::from(value_section.to_vec()).into(),
            Some(nulls),
        )),
        DataType::Timestamp(arrow::datatypes::TimeUnit::Nanosecond, _) => Arc::new(
            TimestampNanosecondArray::new(Buffer::from(value_section.to_vec()).into(), Some(nulls)),
        ),
        DataType::Utf8 => {
            let mut cursor = &value_section[..];
            let offsets_len = read_u64(&mut cursor) as usize;
            let mut offsets = Vec::with_capacity(offsets_len);
            for _ in 0..offsets_len {
                offsets.push(read_i64(&mut cursor) as i32);
            }
            let data_len = read_u64(&mut cursor) as usize;
            let data = cursor[..data_len].to_vec();
            let offsets_buffer = arrow::buffer::OffsetBuffer::new(offsets.into());
            Arc::new(StringArray::new(offsets_buffer, Buffer::from(data), Some(nulls)))
        }
        other => return Err(Error::Other(format!("unsupported spill type {other:?}"))),
    })
}

fn read_u64(cursor: &mut &[u8]) -> u64 {
    let (head, tail) = cursor.split_at(8);
    *cursor = tail;
    u64::from_le_bytes(head.try_into().expect("8 bytes"))
}

fn read_i64(cursor: &mut &[u8]) -> i64 {
    let (head, tail) = cursor.split_at(8);
    *cursor = tail;
    i64::from_le_bytes(head.try_into().expect("8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{Field, Schema};

    #[test]
    fn round_trips_primitive_columns() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Float64, true),
        ]));
        let morsel = Morsel::new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])) as ArrayRef,
                Arc::new(arrow::array::Float64Array::from(vec![Some(1.5), Some(2.5), None]))
                    as ArrayRef,
            ],
        )
        .unwrap();

        let dir = std::env::temp_dir();
        let path = dir.join(format!("opsp-test-{:x}.bin", std::ptr::addr_of!(schema) as usize));
        write_run(&path, &morsel).unwrap();
        let read_back = read_run(&path, schema).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(read_back.row_count(), 3);
        let a = read_back.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(a.value(0), 1);
        assert!(a.is_null(1));
        assert_eq!(a.value(2), 3);
    }

    #[test]
    fn round_trips_utf8_with_nulls() {
        let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, true)]));
        let morsel = Morsel::new(
            schema.clone(),
            vec![Arc::new(arrow::array::StringArray::from(vec![
                Some("hello"),
                None,
                Some("world"),
            ])) as ArrayRef],
        )
        .unwrap();

        let path = std::env::temp_dir().join("opsp-test-utf8.bin");
        write_run(&path, &morsel).unwrap();
        let read_back = read_run(&path, schema).unwrap();
        std::fs::remove_file(&path).ok();

        let s = read_back
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::StringArray>()
            .unwrap();
        assert_eq!(s.value(0), "hello");
        assert!(s.is_null(1));
        assert_eq!(s.value(2), "world");
    }
}
