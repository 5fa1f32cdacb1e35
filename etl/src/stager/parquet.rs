use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Float32Builder, Float64Builder,
    Int16Builder, Int32Builder, Int64Builder, StringBuilder, Time64MicrosecondBuilder,
    TimestampMicrosecondBuilder, UInt32Builder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveTime};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, ColumnSchema, TableRow, Type};

static NULL_CELL: Cell = Cell::Null;

/// Maps a Postgres column type to the Arrow type its values are written as.
///
/// Numerics are written as text to keep their exact precision. Types without a dedicated mapping
/// are written as text too.
pub fn postgres_to_arrow_type(typ: &Type) -> DataType {
    match *typ {
        Type::BOOL => DataType::Boolean,
        Type::INT2 => DataType::Int16,
        Type::INT4 => DataType::Int32,
        Type::INT8 => DataType::Int64,
        Type::OID => DataType::UInt32,
        Type::FLOAT4 => DataType::Float32,
        Type::FLOAT8 => DataType::Float64,
        Type::DATE => DataType::Date32,
        Type::TIME => DataType::Time64(TimeUnit::Microsecond),
        Type::TIMESTAMP => DataType::Timestamp(TimeUnit::Microsecond, None),
        Type::TIMESTAMPTZ => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        Type::BYTEA => DataType::Binary,
        _ => DataType::Utf8,
    }
}

/// Encodes rows into an in-memory Parquet file with one SNAPPY compressed row group.
pub fn encode_parquet(rows: &[TableRow], columns: &[ColumnSchema]) -> EtlResult<Vec<u8>> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|column| Field::new(&column.name, postgres_to_arrow_type(&column.typ), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let mut arrays = Vec::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        let cells = rows.iter().map(|row| row.values.get(index).unwrap_or(&NULL_CELL));
        arrays.push(cells_to_array(cells, &postgres_to_arrow_type(&column.typ), &column.name)?);
    }

    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(buffer)
}

fn mismatch(column: &str, expected: &str, cell: &Cell) -> crate::error::EtlError {
    crate::etl_error!(
        ErrorKind::InvalidData,
        "Cell does not match its column type",
        format!("column `{column}` expects {expected}, got {cell:?}")
    )
}

/// Builds the Arrow array of one column.
///
/// Special values Postgres prints as text in temporal and numeric columns (`infinity`, `NaN`) have
/// no Arrow representation and are written as nulls.
fn cells_to_array<'a>(
    cells: impl ExactSizeIterator<Item = &'a Cell>,
    data_type: &DataType,
    column: &str,
) -> EtlResult<ArrayRef> {
    let n = cells.len();

    let array: ArrayRef = match data_type {
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::Bool(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "bool", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Int16 => {
            let mut b = Int16Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::I16(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "i16", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Int32 => {
            let mut b = Int32Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::I32(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "i32", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::I64(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "i64", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::UInt32 => {
            let mut b = UInt32Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::U32(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "u32", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Float32 => {
            let mut b = Float32Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::F32(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "f32", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::F64(v) => b.append_value(*v),
                    other => return Err(mismatch(column, "f64", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Date32 => {
            let mut b = Date32Builder::with_capacity(n);
            let epoch = NaiveDate::default();
            for c in cells {
                match c {
                    Cell::Null | Cell::String(_) => b.append_null(),
                    Cell::Date(d) => b.append_value((*d - epoch).num_days() as i32),
                    other => return Err(mismatch(column, "date", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            let mut b = Time64MicrosecondBuilder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::Time(t) => {
                        let micros = t
                            .signed_duration_since(NaiveTime::MIN)
                            .num_microseconds()
                            .unwrap_or_default();
                        b.append_value(micros);
                    }
                    other => return Err(mismatch(column, "time", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            let mut b = TimestampMicrosecondBuilder::with_capacity(n);
            for c in cells {
                match c {
                    Cell::Null | Cell::String(_) => b.append_null(),
                    Cell::TimeStamp(ts) => b.append_value(ts.and_utc().timestamp_micros()),
                    Cell::TimeStampTz(ts) => b.append_value(ts.timestamp_micros()),
                    other => return Err(mismatch(column, "timestamp", other)),
                }
            }
            Arc::new(b.finish().with_timezone_opt(tz.clone()))
        }
        DataType::Binary => {
            let mut b = BinaryBuilder::new();
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::Bytes(v) => b.append_value(v),
                    other => return Err(mismatch(column, "bytes", other)),
                }
            }
            Arc::new(b.finish())
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::new();
            for c in cells {
                match c {
                    Cell::Null => b.append_null(),
                    Cell::String(s) => b.append_value(s),
                    other => b.append_value(other.to_text()),
                }
            }
            Arc::new(b.finish())
        }
        other => {
            bail!(
                ErrorKind::ConversionError,
                "Unsupported Arrow data type",
                format!("{other:?}")
            )
        }
    };

    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use bytes::Bytes;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use std::str::FromStr;

    fn columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id", Type::INT4),
            ColumnSchema::new("amount", Type::NUMERIC),
            ColumnSchema::new("placed_on", Type::DATE),
        ]
    }

    #[test]
    fn maps_column_types() {
        assert_eq!(postgres_to_arrow_type(&Type::INT2), DataType::Int16);
        assert_eq!(postgres_to_arrow_type(&Type::INT4), DataType::Int32);
        assert_eq!(postgres_to_arrow_type(&Type::NUMERIC), DataType::Utf8);
        assert_eq!(postgres_to_arrow_type(&Type::UUID), DataType::Utf8);
        assert_eq!(
            postgres_to_arrow_type(&Type::TIMESTAMPTZ),
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
    }

    #[test]
    fn writes_readable_parquet() {
        let rows = vec![
            TableRow::new(vec![
                Cell::I32(1),
                Cell::Numeric(BigDecimal::from_str("10.50").unwrap()),
                Cell::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            ]),
            TableRow::new(vec![Cell::I32(2), Cell::Null, Cell::String("infinity".into())]),
        ];

        let bytes = encode_parquet(&rows, &columns()).unwrap();
        let reader = SerializedFileReader::new(Bytes::from(bytes)).unwrap();
        let metadata = reader.metadata().file_metadata();

        assert_eq!(metadata.num_rows(), 2);
        let names: Vec<_> = metadata
            .schema_descr()
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["id", "amount", "placed_on"]);
    }

    #[test]
    fn rejects_cells_of_the_wrong_type() {
        let rows = vec![TableRow::new(vec![
            Cell::String("one".into()),
            Cell::Null,
            Cell::Null,
        ])];

        let err = encode_parquet(&rows, &columns()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
