//! In-memory tabular dataset and the delimited-text loader.
//!
//! The loader reads the whole file once, decodes every field with the
//! configured encoding and then types each column by scanning all of its
//! cells: Integer when every non-missing cell parses as `i64`, Float when every
//! one parses as `f64`, Text otherwise.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use log::debug;

use crate::{
    data::{ColumnType, Value, is_missing_token, parse_typed_value},
    io_utils,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Builds a table from already-typed rows, inferring column types from the values.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let types = (0..columns.len())
            .map(|idx| ColumnType::infer(rows.iter().filter_map(|row| row.get(idx))))
            .collect();
        Self {
            columns,
            types,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: usize) -> &Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&Value::Null)
    }

    pub fn is_numeric_column(&self, column: usize) -> bool {
        self.types.get(column).is_some_and(|ty| ty.is_numeric())
    }

    /// Keeps the rows matching `predicate`, preserving column types.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(&[Value]) -> bool,
    {
        Table {
            columns: self.columns.clone(),
            types: self.types.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(row.as_slice()))
                .cloned()
                .collect(),
        }
    }
}

pub fn load_csv(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Table> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let columns = io_utils::reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading headers from {path:?}"))?;
    if columns.is_empty() {
        return Err(anyhow!("Input {path:?} has no header row"));
    }
    debug!("Tabular columns: {columns:?}");

    let mut raw_rows = Vec::new();
    for (row_idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        let decoded = io_utils::decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {}", row_idx + 2))?;
        raw_rows.push(decoded);
    }

    let types = infer_column_types(columns.len(), &raw_rows);
    let mut rows = Vec::with_capacity(raw_rows.len());
    for (row_idx, raw) in raw_rows.iter().enumerate() {
        let typed = raw
            .iter()
            .zip(types.iter())
            .map(|(cell, ty)| parse_typed_value(cell, *ty))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Parsing row {}", row_idx + 2))?;
        rows.push(typed);
    }
    Ok(Table {
        columns,
        types,
        rows,
    })
}

fn infer_column_types(width: usize, rows: &[Vec<String>]) -> Vec<ColumnType> {
    let mut possible_integer = vec![true; width];
    let mut possible_float = vec![true; width];
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(width) {
            if is_missing_token(cell) {
                continue;
            }
            let trimmed = cell.trim();
            if possible_integer[idx] && trimmed.parse::<i64>().is_err() {
                possible_integer[idx] = false;
            }
            if possible_float[idx] && trimmed.parse::<f64>().is_err() {
                possible_float[idx] = false;
            }
        }
    }
    (0..width)
        .map(|idx| {
            if possible_integer[idx] {
                ColumnType::Integer
            } else if possible_float[idx] {
                ColumnType::Float
            } else {
                ColumnType::Text
            }
        })
        .collect()
}
