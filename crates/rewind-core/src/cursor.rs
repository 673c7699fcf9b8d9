//! Result cursors: tuple or mapping rows, buffered or streamed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{HistoryError, HistoryResult};
use crate::types::{ResultSet, Value};

/// Cursor flavour a session hands results out with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum CursorKind {
    /// Tuples, buffered.
    #[default]
    #[strum(to_string = "Cursor", serialize = "tuple")]
    #[serde(alias = "tuple")]
    Cursor,
    /// Mappings, buffered.
    #[strum(to_string = "DictCursor", serialize = "dict")]
    #[serde(alias = "dict")]
    DictCursor,
    /// Tuples, streamed.
    #[strum(to_string = "SSCursor", serialize = "stream")]
    #[serde(alias = "stream")]
    SSCursor,
    /// Mappings, streamed.
    #[strum(to_string = "SSDictCursor", serialize = "dict_stream")]
    #[serde(alias = "dict_stream")]
    SSDictCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Tuple,
    Mapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffering {
    /// All rows are known up front: rowcount is exact and scrolling is free.
    Buffered,
    /// Rows are consumed as read: rowcount is unknown until exhausted and
    /// scrolling only moves forward.
    Streamed,
}

impl CursorKind {
    pub fn shape(self) -> RowShape {
        match self {
            CursorKind::Cursor | CursorKind::SSCursor => RowShape::Tuple,
            CursorKind::DictCursor | CursorKind::SSDictCursor => RowShape::Mapping,
        }
    }

    pub fn buffering(self) -> Buffering {
        match self {
            CursorKind::Cursor | CursorKind::DictCursor => Buffering::Buffered,
            CursorKind::SSCursor | CursorKind::SSDictCursor => Buffering::Streamed,
        }
    }
}

/// A fetched row in the cursor's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchedRow {
    Tuple(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl FetchedRow {
    /// Value at `index` for tuples, or of column `name` for mappings.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        match self {
            FetchedRow::Tuple(values) => values.get(index),
            FetchedRow::Mapping(map) => map.get(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ScrollMode {
    #[default]
    Relative,
    Absolute,
}

/// Rows of the last statement and a read position.
#[derive(Debug, Clone, Default)]
pub struct ResultCursor {
    kind: CursorKind,
    result: ResultSet,
    position: usize,
}

impl ResultCursor {
    pub fn new(kind: CursorKind, result: ResultSet) -> Self {
        Self {
            kind,
            result,
            position: 0,
        }
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// Column names of the result.
    pub fn description(&self) -> &[String] {
        &self.result.columns
    }

    /// Number of rows, when the cursor knows it.
    pub fn rowcount(&self) -> Option<u64> {
        match self.kind.buffering() {
            Buffering::Buffered => Some(self.result.len() as u64),
            Buffering::Streamed if self.position >= self.result.len() => {
                Some(self.result.len() as u64)
            }
            Buffering::Streamed => None,
        }
    }

    /// Index of the next row to be fetched.
    pub fn rownumber(&self) -> usize {
        self.position
    }

    fn shape_row(&self, index: usize) -> Option<FetchedRow> {
        match self.kind.shape() {
            RowShape::Tuple => self.result.rows.get(index).cloned().map(FetchedRow::Tuple),
            RowShape::Mapping => self.result.row_map(index).map(FetchedRow::Mapping),
        }
    }

    pub fn fetchone(&mut self) -> Option<FetchedRow> {
        let row = self.shape_row(self.position)?;
        self.position += 1;
        Some(row)
    }

    pub fn fetchmany(&mut self, size: usize) -> Vec<FetchedRow> {
        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            match self.fetchone() {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        rows
    }

    pub fn fetchall(&mut self) -> Vec<FetchedRow> {
        let mut rows = Vec::with_capacity(self.result.len().saturating_sub(self.position));
        while let Some(row) = self.fetchone() {
            rows.push(row);
        }
        rows
    }

    /// Move the read position.
    pub fn scroll(&mut self, value: i64, mode: ScrollMode) -> HistoryResult<()> {
        let target = match mode {
            ScrollMode::Relative => self.position as i64 + value,
            ScrollMode::Absolute => value,
        };
        if self.kind.buffering() == Buffering::Streamed && target < self.position as i64 {
            return Err(HistoryError::NotSupported(
                "streamed cursors cannot scroll backwards".to_string(),
            ));
        }
        if target < 0 || target > self.result.len() as i64 {
            return Err(HistoryError::validation(format!(
                "scroll target {} is out of range",
                target
            )));
        }
        self.position = target as usize;
        Ok(())
    }
}
