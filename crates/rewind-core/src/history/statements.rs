//! SQL issued against tracked tables and their history tables.

use crate::config::HistoryConfig;
use crate::error::{ErrorCode, HistoryError, HistoryResult};

/// Largest number of ids inlined into one `IN (...)` list.
pub const ID_CHUNK: usize = 1000;

pub const BEGIN_COLUMN: &str = "record_begin_time";
pub const END_COLUMN: &str = "record_end_time";
pub const USER_COLUMN: &str = "record_operate_user";

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render ids as an inline `IN` list body.
pub fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Column layout shared by a tracked table and its history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLayout {
    pub table: String,
    pub history_table: String,
    /// Columns of the tracked table that are versioned.
    pub tracked_columns: Vec<String>,
    /// Scope columns of the tracked table, mirrored as `base_<c>`.
    pub scope_columns: Vec<String>,
    pub pk: String,
}

impl HistoryLayout {
    /// Derive the layout from the tracked table's columns.
    pub fn new(table: &str, columns: &[String], config: &HistoryConfig) -> HistoryResult<Self> {
        if columns.is_empty() {
            return Err(HistoryError::analysis_with_code(
                format!("table '{}' has no columns or does not exist", table),
                ErrorCode::AnaTableNotFound,
            ));
        }
        let pk = columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(&config.primary_key))
            .cloned()
            .ok_or_else(|| {
                HistoryError::analysis(format!(
                    "table '{}' has no primary key column '{}'",
                    table, config.primary_key
                ))
            })?;
        let (scope_columns, tracked_columns) = columns
            .iter()
            .cloned()
            .partition(|c| config.is_scope_column(c));
        Ok(Self {
            table: table.to_string(),
            history_table: config.history_table(table),
            tracked_columns,
            scope_columns,
            pk,
        })
    }

    pub fn base_pk(&self) -> String {
        base(&self.pk)
    }

    fn history_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.tracked_columns.iter().map(|c| quote_ident(c)).collect();
        cols.extend([BEGIN_COLUMN, END_COLUMN, USER_COLUMN].map(quote_ident));
        cols.extend(self.scope_columns.iter().map(|c| quote_ident(&base(c))));
        cols
    }

    /// Copy live rows into history. Binds begin, end and operate user.
    pub fn copy_rows_sql(&self, ids: &[i64]) -> String {
        let mut select: Vec<String> = self.tracked_columns.iter().map(|c| quote_ident(c)).collect();
        select.extend(["?".to_string(), "?".to_string(), "?".to_string()]);
        select.extend(self.scope_columns.iter().map(|c| quote_ident(c)));
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {} IN ({})",
            quote_ident(&self.history_table),
            self.history_columns().join(", "),
            select.join(", "),
            quote_ident(&self.table),
            quote_ident(&self.pk),
            id_list(ids)
        )
    }

    /// Close the open interval of each id. Binds the new end and the sentinel.
    pub fn close_intervals_sql(&self, ids: &[i64]) -> String {
        format!(
            "UPDATE {} SET {} = ? WHERE {} IN ({}) AND {} = ?",
            quote_ident(&self.history_table),
            quote_ident(END_COLUMN),
            quote_ident(&self.base_pk()),
            id_list(ids),
            quote_ident(END_COLUMN)
        )
    }

    /// All primary keys of the tracked table.
    pub fn all_ids_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {}",
            quote_ident(&self.pk),
            quote_ident(&self.table),
            quote_ident(&self.pk)
        )
    }

    /// The given primary keys that exist in the tracked table.
    pub fn existing_ids_sql(&self, ids: &[i64]) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
            quote_ident(&self.pk),
            quote_ident(&self.table),
            quote_ident(&self.pk),
            id_list(ids),
            quote_ident(&self.pk)
        )
    }

    /// The given ids that already have history.
    pub fn recorded_ids_sql(&self, ids: &[i64]) -> String {
        format!(
            "SELECT DISTINCT {} FROM {} WHERE {} IN ({})",
            quote_ident(&self.base_pk()),
            quote_ident(&self.history_table),
            quote_ident(&self.base_pk()),
            id_list(ids)
        )
    }

    fn history_select_list(&self) -> String {
        let mut cols = vec![quote_ident(&self.pk)];
        cols.extend(self.history_columns());
        cols.join(", ")
    }

    /// Every history row of one logical row, oldest first. Binds the base id.
    pub fn history_of_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY {}",
            self.history_select_list(),
            quote_ident(&self.history_table),
            quote_ident(&self.base_pk()),
            quote_ident(&self.pk)
        )
    }

    /// One history row. Binds the history row id.
    pub fn history_row_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ?",
            self.history_select_list(),
            quote_ident(&self.history_table),
            quote_ident(&self.pk)
        )
    }

    /// Most recent history row of one logical row. Binds the base id.
    pub fn latest_history_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ? ORDER BY {} DESC LIMIT 1",
            self.history_select_list(),
            quote_ident(&self.history_table),
            quote_ident(&self.base_pk()),
            quote_ident(&self.pk)
        )
    }
}

fn base(column: &str) -> String {
    format!("base_{}", column)
}

/// Snapshot the primary keys a mutation is about to touch.
pub fn snapshot_sql(key: &str, pk: &str, predicate: &str) -> String {
    format!("SELECT {}.{}{}", quote_ident(key), quote_ident(pk), predicate)
}
