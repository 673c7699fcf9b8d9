//! Database driver trait and related types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HistoryResult;
use crate::types::{ExecOutcome, ResultSet, Value};

/// Core Driver trait - every database backend implements this.
///
/// Statements arrive with `?` markers and one value per marker. A driver
/// whose engine uses another marker style translates them itself.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Driver: Send {
    /// Execute a statement that does not return rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> HistoryResult<ExecOutcome>;

    /// Execute a statement and collect its rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> HistoryResult<ResultSet>;

    /// Column names of a table, in definition order. Empty when the table does not exist.
    async fn table_columns(&mut self, table: &str) -> HistoryResult<Vec<String>>;

    /// Start a transaction.
    async fn begin(&mut self) -> HistoryResult<()>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> HistoryResult<()>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> HistoryResult<()>;

    /// Release the connection.
    async fn close(&mut self) -> HistoryResult<()>;
}

#[async_trait]
impl Driver for Box<dyn Driver> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> HistoryResult<ExecOutcome> {
        (**self).execute(sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> HistoryResult<ResultSet> {
        (**self).query(sql, params).await
    }

    async fn table_columns(&mut self, table: &str) -> HistoryResult<Vec<String>> {
        (**self).table_columns(table).await
    }

    async fn begin(&mut self) -> HistoryResult<()> {
        (**self).begin().await
    }

    async fn commit(&mut self) -> HistoryResult<()> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> HistoryResult<()> {
        (**self).rollback().await
    }

    async fn close(&mut self) -> HistoryResult<()> {
        (**self).close().await
    }
}

/// Driver provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverProvider {
    #[default]
    Sqlite,
    Mysql,
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    /// Provider type.
    #[serde(default)]
    pub provider: DriverProvider,
    /// Connection URL (`mysql://...`) or SQLite path. `:memory:` or
    /// nothing opens an in-memory SQLite database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DriverConfig {
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            provider: DriverProvider::Sqlite,
            url: Some(path.into()),
        }
    }

    pub fn mysql(url: impl Into<String>) -> Self {
        Self {
            provider: DriverProvider::Mysql,
            url: Some(url.into()),
        }
    }
}
