//! Record accessors: uniform field access over bound data shapes.
//!
//! Each concrete data shape (typed record, dynamic map, DataFrame row)
//! implements [`RecordAccessor`] once; the column resolver and renderers only
//! ever talk to the trait.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Cursor;

use polars::prelude::{AnyValue, DataFrame, IpcReader, SerReader};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ReportError, Result};
use crate::spec::EnumCellValue;

/// How field names of a record collection are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumRecordShape {
    /// All records share the first record's fields.
    Typed,
    /// Records may carry different keys; names are unioned over a prefix.
    Dynamic,
}

/// Field access capability of one bound record.
pub trait RecordAccessor: fmt::Debug {
    /// Ordered field names exposed by this record.
    fn field_names(&self) -> Vec<String>;

    /// Value of `name`, or `None` when the record has no such field.
    fn field_value(&self, name: &str) -> Option<EnumCellValue>;

    /// Discovery rule for collections of this record type.
    fn shape(&self) -> EnumRecordShape {
        EnumRecordShape::Typed
    }
}

impl<T: RecordAccessor + ?Sized> RecordAccessor for Box<T> {
    fn field_names(&self) -> Vec<String> {
        (**self).field_names()
    }

    fn field_value(&self, name: &str) -> Option<EnumCellValue> {
        (**self).field_value(name)
    }

    fn shape(&self) -> EnumRecordShape {
        (**self).shape()
    }
}

impl RecordAccessor for BTreeMap<String, EnumCellValue> {
    fn field_names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn field_value(&self, name: &str) -> Option<EnumCellValue> {
        self.get(name).cloned()
    }

    fn shape(&self) -> EnumRecordShape {
        EnumRecordShape::Dynamic
    }
}

impl RecordAccessor for HashMap<String, EnumCellValue> {
    fn field_names(&self) -> Vec<String> {
        let mut l_names: Vec<String> = self.keys().cloned().collect();
        l_names.sort();
        l_names
    }

    fn field_value(&self, name: &str) -> Option<EnumCellValue> {
        self.get(name).cloned()
    }

    fn shape(&self) -> EnumRecordShape {
        EnumRecordShape::Dynamic
    }
}

impl RecordAccessor for Map<String, Value> {
    fn field_names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn field_value(&self, name: &str) -> Option<EnumCellValue> {
        self.get(name).map(derive_cell_value_from_json)
    }

    fn shape(&self) -> EnumRecordShape {
        EnumRecordShape::Dynamic
    }
}

/// Typed record captured from any `Serialize` value.
///
/// Struct fields keep declaration order. Values that do not serialize to an
/// object expose no fields, so discovery falls back to explicit columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    dict_fields: Map<String, Value>,
}

impl TypedRecord {
    /// Capture one serializable value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        let value_json = serde_json::to_value(value)
            .map_err(|err| ReportError::Binding(format!("Failed to capture record: {err}")))?;
        let dict_fields = match value_json {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self { dict_fields })
    }

    /// Capture a slice of serializable values.
    pub fn from_slice<T: Serialize>(values: &[T]) -> Result<Vec<Self>> {
        values.iter().map(Self::from_serialize).collect()
    }
}

impl RecordAccessor for TypedRecord {
    fn field_names(&self) -> Vec<String> {
        self.dict_fields.keys().cloned().collect()
    }

    fn field_value(&self, name: &str) -> Option<EnumCellValue> {
        self.dict_fields.get(name).map(derive_cell_value_from_json)
    }
}

/// Ordered row with a fixed field list (tabular sources).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecRecordRow {
    /// `(field, value)` pairs in column order.
    pub cells: Vec<(String, EnumCellValue)>,
}

impl SpecRecordRow {
    /// Build a row from `(field, value)` pairs.
    pub fn new<K, V>(cells: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<EnumCellValue>,
    {
        Self {
            cells: cells
                .into_iter()
                .map(|(key, val)| (key.into(), val.into()))
                .collect(),
        }
    }
}

impl RecordAccessor for SpecRecordRow {
    fn field_names(&self) -> Vec<String> {
        self.cells.iter().map(|(name, _)| name.clone()).collect()
    }

    fn field_value(&self, name: &str) -> Option<EnumCellValue> {
        self.cells
            .iter()
            .find(|(c_name, _)| c_name == name)
            .map(|(_, value)| value.clone())
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region DataFrameRecords

/// Convert every DataFrame row into a [`SpecRecordRow`].
pub fn derive_records_from_dataframe(df: &DataFrame) -> Result<Vec<SpecRecordRow>> {
    let l_colnames: Vec<String> = df
        .get_column_names_str()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    let l_cols = df.get_columns();

    let mut l_rows = Vec::with_capacity(df.height());
    for n_idx_row in 0..df.height() {
        let mut l_cells = Vec::with_capacity(l_colnames.len());
        for (c_name, col) in l_colnames.iter().zip(l_cols) {
            let value = derive_cell_value_from_any_value(col.get(n_idx_row)?);
            l_cells.push((c_name.clone(), value));
        }
        l_rows.push(SpecRecordRow { cells: l_cells });
    }
    Ok(l_rows)
}

/// Decode Polars IPC bytes into a DataFrame.
pub fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame> {
    Ok(IpcReader::new(Cursor::new(v_ipc_df)).finish()?)
}

fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Bool(val),
        AnyValue::UInt8(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt16(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt32(val) => EnumCellValue::Number(val as f64),
        AnyValue::UInt64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int8(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int16(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int64(val) => EnumCellValue::Number(val as f64),
        AnyValue::Int128(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float32(val) => EnumCellValue::Number(val as f64),
        AnyValue::Float64(val) => EnumCellValue::Number(val),
        _ => EnumCellValue::String(value.to_string()),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

/// Map a JSON/YAML-like scalar onto a cell value.
pub fn derive_cell_value_from_json(value: &Value) -> EnumCellValue {
    match value {
        Value::Null => EnumCellValue::None,
        Value::Bool(val) => EnumCellValue::Bool(*val),
        Value::Number(val) => val
            .as_f64()
            .map_or_else(|| EnumCellValue::String(val.to_string()), EnumCellValue::Number),
        Value::String(val) => EnumCellValue::String(val.clone()),
        other => EnumCellValue::String(other.to_string()),
    }
}
