//! Packing of `executemany` INSERT rows into multi-row statements.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SqlDialect;
use crate::error::HistoryResult;
use crate::sql::tokens::{tokenize, TokenKind};
use crate::sql::Statement;
use crate::types::{InsertBatch, Params, Value};

static INSERT_VALUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*((?:INSERT|REPLACE)\b.+\bVALUES?\s*)(\(\s*(?:%s|\?|%\(\w+\)s|:\w+)\s*(?:,\s*(?:%s|\?|%\(\w+\)s|:\w+)\s*)*\))(\s*(?:ON\s+DUPLICATE.*)?);?\s*$",
    )
    .unwrap()
});

/// An `INSERT ... VALUES (<placeholders>)` split around its row template.
#[derive(Debug, Clone)]
pub struct InsertValues {
    prefix: String,
    template: Statement,
    suffix: String,
}

/// One multi-row INSERT ready for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedInsert {
    pub sql: String,
    pub values: Vec<Value>,
    pub rows: usize,
}

fn has_placeholder(sql: &str, dialect: SqlDialect) -> bool {
    match tokenize(sql, dialect) {
        Ok(tokens) => tokens
            .iter()
            .any(|t| matches!(t.kind, TokenKind::Placeholder(_))),
        Err(_) => true,
    }
}

impl InsertValues {
    /// Split `sql`, or `None` when it is not a single-row VALUES insert whose
    /// placeholders all sit in the row template.
    pub fn parse(sql: &str, dialect: SqlDialect) -> Option<Self> {
        let caps = INSERT_VALUES.captures(sql)?;
        let prefix = caps.get(1)?.as_str().to_string();
        let row = caps.get(2)?.as_str();
        let suffix = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
        if has_placeholder(&prefix, dialect) || has_placeholder(&suffix, dialect) {
            return None;
        }
        let template = Statement::parse(row, dialect).ok()?;
        Some(Self {
            prefix,
            template,
            suffix,
        })
    }

    /// Whether the statement ends in `ON DUPLICATE KEY UPDATE`.
    pub fn is_upsert(&self) -> bool {
        !self.suffix.trim().is_empty()
    }

    /// Bind every argument row and pack the rows into as few statements as
    /// the length and parameter limits allow.
    pub fn pack(
        &self,
        rows: &[Params],
        max_len: usize,
        max_params: usize,
    ) -> HistoryResult<Vec<PackedInsert>> {
        let mut packed: Vec<PackedInsert> = Vec::new();
        let mut current: Option<(PackedInsert, usize)> = None;

        for params in rows {
            let bound = self.template.bind(params)?;
            let row_len = bound.sql.len() - bound.values.len()
                + bound.values.iter().map(Value::literal_len).sum::<usize>();

            if let Some((insert, len)) = current.as_mut() {
                let fits = *len + 1 + row_len + self.suffix.len() <= max_len
                    && insert.values.len() + bound.values.len() <= max_params;
                if fits {
                    insert.sql.push(',');
                    insert.sql.push_str(&bound.sql);
                    insert.values.extend(bound.values);
                    insert.rows += 1;
                    *len += 1 + row_len;
                    continue;
                }
            }
            if let Some((insert, _)) = current.take() {
                packed.push(self.finish(insert));
            }
            current = Some((
                PackedInsert {
                    sql: format!("{}{}", self.prefix, bound.sql),
                    values: bound.values,
                    rows: 1,
                },
                self.prefix.len() + row_len,
            ));
        }
        if let Some((insert, _)) = current {
            packed.push(self.finish(insert));
        }
        Ok(packed)
    }

    fn finish(&self, mut insert: PackedInsert) -> PackedInsert {
        insert.sql.push_str(&self.suffix);
        insert
    }
}

/// Ids generated by a sequence of batched inserts, in order.
pub fn reconstruct_ids(batches: &[InsertBatch]) -> Vec<i64> {
    batches.iter().flat_map(InsertBatch::ids).collect()
}
