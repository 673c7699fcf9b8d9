//! Results returned by drivers and recorded by sessions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Value;

/// Rows returned by a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Integer values of the first column, skipping NULLs.
    pub fn first_column_i64(&self) -> Vec<i64> {
        self.rows
            .iter()
            .filter_map(|r| r.first().and_then(Value::as_i64))
            .collect()
    }

    /// Convert one row into a column-name keyed map.
    pub fn row_map(&self, row: usize) -> Option<BTreeMap<String, Value>> {
        self.rows.get(row).map(|values| {
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// First id generated by the statement, when it generated any.
    pub first_insert_id: Option<i64>,
}

/// One physical INSERT executed while packing a multi-row batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertBatch {
    pub first_id: Option<i64>,
    pub rows: u64,
}

impl InsertBatch {
    /// Ids generated by this batch, assuming contiguous allocation.
    pub fn ids(&self) -> impl Iterator<Item = i64> {
        let (start, count) = match self.first_id {
            Some(first) if first > 0 => (first, self.rows as i64),
            _ => (0, 0),
        };
        start..start + count
    }
}
