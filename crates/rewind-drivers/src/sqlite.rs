//! SQLite driver implementation.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use rewind_core::config::SqlDialect;
use rewind_core::error::{ErrorCode, HistoryError, HistoryResult};
use rewind_core::sql::{Statement, StatementKind};
use rewind_core::traits::Driver;
use rewind_core::types::{ExecOutcome, ResultSet, Value};

/// SQLite driver over a single rusqlite connection.
pub struct SqliteDriver {
    conn: Option<Connection>,
}

impl SqliteDriver {
    /// Open a database file, creating parent directories as needed.
    /// `:memory:` opens an in-memory database.
    pub fn open(path: impl AsRef<Path>) -> HistoryResult<Self> {
        let path = path.as_ref();
        if path.to_str() == Some(":memory:") {
            return Self::open_in_memory();
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(connect_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> HistoryResult<Self> {
        let conn = Connection::open_in_memory().map_err(connect_error)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    /// The underlying connection, for schema setup and direct inspection.
    pub fn connection(&self) -> HistoryResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| HistoryError::driver("connection is closed"))
    }
}

fn connect_error(e: rusqlite::Error) -> HistoryError {
    HistoryError::Driver {
        message: format!("Failed to open SQLite database: {}", e),
        code: ErrorCode::DrvConnectionFailed,
        source: Some(Box::new(e)),
    }
}

fn sqlite_error(e: rusqlite::Error) -> HistoryError {
    HistoryError::driver_with_source(e.to_string(), e)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn is_insert(sql: &str) -> bool {
    Statement::parse(sql, SqlDialect::Sqlite)
        .map(|stmt| stmt.kind() == StatementKind::Insert)
        .unwrap_or(false)
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> HistoryResult<ExecOutcome> {
        let conn = self.connection()?;
        debug!(sql, params = params.len(), "sqlite execute");
        let mut stmt = conn.prepare(sql).map_err(sqlite_error)?;
        let changes = stmt
            .execute(params_from_iter(params.iter().map(to_sql)))
            .map_err(sqlite_error)? as u64;

        // last_insert_rowid is the id of the last row; multi-row inserts
        // allocate contiguously.
        let first_insert_id = if changes > 0 && is_insert(sql) {
            Some(conn.last_insert_rowid() - changes as i64 + 1)
        } else {
            None
        };
        Ok(ExecOutcome {
            rows_affected: changes,
            first_insert_id,
        })
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> HistoryResult<ResultSet> {
        let conn = self.connection()?;
        debug!(sql, params = params.len(), "sqlite query");
        let mut stmt = conn.prepare(sql).map_err(sqlite_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql)))
            .map_err(sqlite_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sqlite_error)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i).map_err(sqlite_error)?));
            }
            out.push(values);
        }
        Ok(ResultSet::new(columns, out))
    }

    async fn table_columns(&mut self, table: &str) -> HistoryResult<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(sqlite_error)?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))
            .map_err(sqlite_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlite_error)?;
        Ok(names)
    }

    async fn begin(&mut self) -> HistoryResult<()> {
        self.connection()?
            .execute_batch("BEGIN")
            .map_err(sqlite_error)
    }

    async fn commit(&mut self) -> HistoryResult<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("COMMIT").map_err(sqlite_error)
    }

    async fn rollback(&mut self) -> HistoryResult<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch("ROLLBACK").map_err(sqlite_error)
    }

    async fn close(&mut self) -> HistoryResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| sqlite_error(e))?;
        }
        Ok(())
    }
}
