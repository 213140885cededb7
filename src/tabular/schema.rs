//! Per-column schema inference
//!
//! For every column of a loaded [`Table`]: a dtype label, numeric /
//! categorical / datetime flags, the distinct non-null value count and the
//! missing (null) value count.

use super::Table;
use crate::Result;
use arrow::array::Array;
use arrow::datatypes::DataType;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Statistics for one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: String,
    pub is_numeric: bool,
    pub is_categorical: bool,
    pub is_datetime: bool,
    pub n_unique: u64,
    pub missing: u64,
}

/// Compute column statistics for every column, in schema order
pub fn infer_schema(table: &Table) -> Result<Vec<ColumnSchema>> {
    let options = FormatOptions::default();
    let mut columns = Vec::with_capacity(table.num_columns());

    for (index, field) in table.schema().fields().iter().enumerate() {
        let data_type = field.data_type();
        let mut distinct: HashSet<String> = HashSet::new();
        let mut missing = 0u64;

        for batch in table.batches() {
            let array = batch.column(index);
            let nulls = array.logical_nulls();
            missing += nulls.as_ref().map(|n| n.null_count()).unwrap_or(0) as u64;

            if matches!(data_type, DataType::Null) {
                continue;
            }

            let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
            for row in 0..array.len() {
                if nulls.as_ref().is_some_and(|n| n.is_null(row)) {
                    continue;
                }
                distinct.insert(formatter.value(row).to_string());
            }
        }

        columns.push(ColumnSchema {
            name: field.name().clone(),
            dtype: dtype_label(data_type),
            is_numeric: is_numeric(data_type),
            is_categorical: matches!(data_type, DataType::Dictionary(_, _)),
            is_datetime: is_datetime(data_type),
            n_unique: distinct.len() as u64,
            missing,
        });
    }

    Ok(columns)
}

/// Short dtype label for a column type
pub fn dtype_label(data_type: &DataType) -> String {
    let label = match data_type {
        DataType::Int8 => "int8",
        DataType::Int16 => "int16",
        DataType::Int32 => "int32",
        DataType::Int64 => "int64",
        DataType::UInt8 => "uint8",
        DataType::UInt16 => "uint16",
        DataType::UInt32 => "uint32",
        DataType::UInt64 => "uint64",
        DataType::Float16 => "float16",
        DataType::Float32 => "float32",
        DataType::Float64 => "float64",
        DataType::Boolean => "bool",
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "string",
        DataType::Date32 | DataType::Date64 => "date",
        DataType::Timestamp(_, None) => "datetime",
        DataType::Timestamp(_, Some(tz)) => return format!("datetime[{}]", tz),
        DataType::Dictionary(_, _) => "category",
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => "decimal",
        DataType::Null => "null",
        other => return other.to_string().to_lowercase(),
    };
    label.to_string()
}

fn is_numeric(data_type: &DataType) -> bool {
    data_type.is_integer()
        || data_type.is_floating()
        || matches!(data_type, DataType::Decimal128(_, _) | DataType::Decimal256(_, _))
}

fn is_datetime(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _)
    )
}
