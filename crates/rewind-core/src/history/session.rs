//! History-maintaining session over one driver connection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::batch::{reconstruct_ids, InsertValues};
use super::changes::{classify_history, ChangeRecord};
use super::clock::{format_timestamp, Clock, SystemClock};
use super::statements::{quote_ident, snapshot_sql, HistoryLayout, BEGIN_COLUMN, END_COLUMN, ID_CHUNK};
use crate::analysis::{analyze_delete, analyze_insert, analyze_update, is_upsert, AliasMap};
use crate::blocking::BlockingSession;
use crate::config::HistoryConfig;
use crate::cursor::{CursorKind, FetchedRow, ResultCursor, ScrollMode};
use crate::error::{ErrorCode, HistoryError, HistoryResult};
use crate::rewrite::rewrite_history_query;
use crate::sql::{Statement, StatementKind};
use crate::traits::Driver;
use crate::types::{ExecOutcome, InsertBatch, Params, ResultSet, Value};

/// Per-call overrides of the session defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Write history for this call. `None` uses `HistoryConfig::enabled`.
    pub history: Option<bool>,
    /// Operating user for this call. `None` uses `HistoryConfig::operate_user`.
    pub operate_user: Option<String>,
}

impl ExecOptions {
    pub fn without_history() -> Self {
        Self {
            history: Some(false),
            operate_user: None,
        }
    }

    pub fn user(user: impl Into<String>) -> Self {
        Self {
            history: None,
            operate_user: Some(user.into()),
        }
    }
}

/// Outcome of a history backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReport {
    /// Ids that received an open history row.
    pub inserted: Vec<i64>,
    /// Ids that already had history.
    pub existing: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackMode {
    /// The row is currently deleted and is re-inserted.
    Insert,
    /// The row exists and is updated in place.
    Update,
}

/// Statement restoring a row to the state recorded in one history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub table: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub base_id: i64,
    pub history_id: i64,
    pub mode: RollbackMode,
}

/// A connection that mirrors every tracked mutation into history tables.
pub struct HistorySession<D: Driver> {
    driver: D,
    config: Arc<HistoryConfig>,
    clock: Arc<dyn Clock>,
    cursor_kind: CursorKind,
    columns: HashMap<String, Vec<String>>,
    last_stamp: Option<NaiveDateTime>,
    cursor: ResultCursor,
    rowcount: Option<u64>,
    lastrowid: Option<i64>,
    batches: Vec<InsertBatch>,
}

impl<D: Driver> HistorySession<D> {
    pub fn new(
        driver: D,
        config: Arc<HistoryConfig>,
        clock: Arc<dyn Clock>,
        cursor_kind: CursorKind,
    ) -> Self {
        Self {
            driver,
            config,
            clock,
            cursor_kind,
            columns: HashMap::new(),
            last_stamp: None,
            cursor: ResultCursor::new(cursor_kind, ResultSet::default()),
            rowcount: None,
            lastrowid: None,
            batches: Vec::new(),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn cursor_kind(&self) -> CursorKind {
        self.cursor_kind
    }

    /// Cursor flavour used for subsequent results.
    pub fn set_cursor_kind(&mut self, kind: CursorKind) {
        self.cursor_kind = kind;
    }

    // ---- statement execution ----

    /// Execute one statement with the session defaults.
    pub async fn execute(&mut self, sql: &str, params: &Params) -> HistoryResult<u64> {
        self.execute_with(sql, params, &ExecOptions::default()).await
    }

    /// Execute one statement, maintaining history for tracked mutations.
    ///
    /// Returns the affected row count, or the number of rows read.
    pub async fn execute_with(
        &mut self,
        sql: &str,
        params: &Params,
        options: &ExecOptions,
    ) -> HistoryResult<u64> {
        let user = self.resolve_user(options)?;
        let history = options.history.unwrap_or(self.config.enabled);
        self.batches.clear();
        self.dispatch(sql, params, history, user.as_deref()).await
    }

    async fn dispatch(
        &mut self,
        sql: &str,
        params: &Params,
        history: bool,
        user: Option<&str>,
    ) -> HistoryResult<u64> {
        let stmt = match Statement::parse(sql, self.config.dialect) {
            Ok(stmt) => stmt,
            Err(e) if e.is_unrecognized() => {
                warn!(error = %e, "Statement not recognized; executing without history");
                return self.passthrough(sql, params).await;
            }
            Err(e) => return Err(e),
        };

        match (history, stmt.kind()) {
            (true, StatementKind::Insert) => self.insert_with_history(&stmt, params, user).await,
            (true, StatementKind::Update) => self.update_with_history(&stmt, params, user).await,
            (true, StatementKind::Delete) => self.delete_with_history(&stmt, params, user).await,
            _ => self.run_plain(&stmt, params).await,
        }
    }

    /// Execute text that could not be parsed, handing arguments over untouched.
    async fn passthrough(&mut self, sql: &str, params: &Params) -> HistoryResult<u64> {
        let values = match params {
            Params::None => Vec::new(),
            Params::Positional(values) => values.clone(),
            Params::Named(_) => {
                return Err(HistoryError::validation(
                    "named arguments need a statement that can be parsed",
                ))
            }
        };
        let outcome = self.driver.execute(sql, &values).await?;
        Ok(self.record(outcome))
    }

    async fn run_plain(&mut self, stmt: &Statement, params: &Params) -> HistoryResult<u64> {
        let bound = stmt.bind(params)?;
        if stmt.returns_rows() {
            let rows = self.driver.query(&bound.sql, &bound.values).await?;
            Ok(self.set_result(rows))
        } else {
            let outcome = self.driver.execute(&bound.sql, &bound.values).await?;
            Ok(self.record(outcome))
        }
    }

    fn record(&mut self, outcome: ExecOutcome) -> u64 {
        self.rowcount = Some(outcome.rows_affected);
        if outcome.first_insert_id.is_some() {
            self.lastrowid = outcome.first_insert_id;
        }
        self.cursor = ResultCursor::new(self.cursor_kind, ResultSet::default());
        outcome.rows_affected
    }

    fn set_result(&mut self, rows: ResultSet) -> u64 {
        let count = rows.len() as u64;
        self.rowcount = None;
        self.cursor = ResultCursor::new(self.cursor_kind, rows);
        count
    }

    async fn insert_with_history(
        &mut self,
        stmt: &Statement,
        params: &Params,
        user: Option<&str>,
    ) -> HistoryResult<u64> {
        let Some(table) = analyze_insert(stmt) else {
            warn!("Could not determine the INSERT target; executing without history");
            return self.run_plain(stmt, params).await;
        };
        let bound = stmt.bind(params)?;
        let outcome = self.driver.execute(&bound.sql, &bound.values).await?;
        let affected = self.record(outcome);

        let batch = InsertBatch {
            first_id: outcome.first_insert_id,
            rows: outcome.rows_affected,
        };
        if is_upsert(stmt) && outcome.rows_affected > 1 {
            warn!(
                table = %table,
                affected = outcome.rows_affected,
                "Upsert may have updated existing rows; history not written"
            );
            return Ok(affected);
        }
        let ids: Vec<i64> = batch.ids().collect();
        if ids.is_empty() {
            warn!(table = %table, "INSERT reported no generated id; history not written");
            return Ok(affected);
        }
        let layout = self.layout(&table).await?;
        let now = format_timestamp(self.stamp());
        let open = self.config.open_interval_end.clone();
        self.copy_rows(&layout, &ids, &now, &open, user).await?;
        Ok(affected)
    }

    async fn update_with_history(
        &mut self,
        stmt: &Statement,
        params: &Params,
        user: Option<&str>,
    ) -> HistoryResult<u64> {
        let info = analyze_update(stmt, params)?;
        let mut columns = HashMap::new();
        if info.needs_schema() {
            for table_ref in &info.refs {
                let cols = self.table_columns(&table_ref.table).await?;
                columns.insert(table_ref.table.clone(), cols);
            }
        }
        let targets = info.resolve_targets(self.config.ambiguity, &columns)?;
        let snapshots = self
            .snapshot(&targets, &info.aliases, &info.predicate, &info.params)
            .await?;
        if snapshots.iter().all(|(_, ids)| ids.is_empty()) {
            debug!("UPDATE matches no rows; history untouched");
            return self.run_plain(stmt, params).await;
        }

        let now = format_timestamp(self.stamp());
        let open = self.config.open_interval_end.clone();
        for (layout, ids) in &snapshots {
            self.close_intervals(layout, ids, &now).await?;
        }
        let bound = stmt.bind(params)?;
        let outcome = self.driver.execute(&bound.sql, &bound.values).await?;
        let affected = self.record(outcome);
        for (layout, ids) in &snapshots {
            self.copy_rows(layout, ids, &now, &open, user).await?;
        }
        Ok(affected)
    }

    async fn delete_with_history(
        &mut self,
        stmt: &Statement,
        params: &Params,
        user: Option<&str>,
    ) -> HistoryResult<u64> {
        let info = analyze_delete(stmt, params)?;
        let snapshots = self
            .snapshot(&info.targets, &info.aliases, &info.predicate, &info.params)
            .await?;
        if snapshots.iter().all(|(_, ids)| ids.is_empty()) {
            debug!("DELETE matches no rows; history untouched");
            return self.run_plain(stmt, params).await;
        }

        let now = format_timestamp(self.stamp());
        for (layout, ids) in &snapshots {
            self.close_intervals(layout, ids, &now).await?;
            // Copied while the rows still exist.
            self.copy_rows(layout, ids, &now, &now, user).await?;
        }
        let bound = stmt.bind(params)?;
        let outcome = self.driver.execute(&bound.sql, &bound.values).await?;
        Ok(self.record(outcome))
    }

    /// Execute `INSERT ... VALUES` for many argument rows in packed chunks,
    /// or any other statement once per argument row.
    ///
    /// History ids are reconstructed from each chunk's first id and affected
    /// count. With `ON DUPLICATE KEY UPDATE` that count includes updated
    /// rows, so a chunk whose count differs from the rows it sent leaves the
    /// batch without history; backfill it with
    /// [`supply_history_data`](Self::supply_history_data).
    pub async fn executemany(&mut self, sql: &str, rows: &[Params]) -> HistoryResult<u64> {
        self.executemany_with(sql, rows, &ExecOptions::default()).await
    }

    pub async fn executemany_with(
        &mut self,
        sql: &str,
        rows: &[Params],
        options: &ExecOptions,
    ) -> HistoryResult<u64> {
        let user = self.resolve_user(options)?;
        let history = options.history.unwrap_or(self.config.enabled);
        self.batches.clear();
        if rows.is_empty() {
            self.rowcount = Some(0);
            return Ok(0);
        }

        let Some(insert) = InsertValues::parse(sql, self.config.dialect) else {
            let is_insert = Statement::parse(sql, self.config.dialect)
                .map(|s| s.kind() == StatementKind::Insert)
                .unwrap_or(false);
            let mut total = 0;
            for params in rows {
                total += self.dispatch(sql, params, history, user.as_deref()).await?;
                if is_insert {
                    self.batches.push(InsertBatch {
                        first_id: self.lastrowid,
                        rows: self.rowcount.unwrap_or_default(),
                    });
                }
            }
            self.rowcount = Some(total);
            return Ok(total);
        };

        let packed = insert.pack(
            rows,
            self.config.max_statement_length,
            self.config.max_batch_params,
        )?;
        let mut total = 0;
        let mut ids_reliable = true;
        for chunk in &packed {
            let outcome = self.driver.execute(&chunk.sql, &chunk.values).await?;
            debug!(rows = chunk.rows, affected = outcome.rows_affected, "Executed INSERT chunk");
            if insert.is_upsert() && outcome.rows_affected != chunk.rows as u64 {
                ids_reliable = false;
            }
            total += outcome.rows_affected;
            self.batches.push(InsertBatch {
                first_id: outcome.first_insert_id,
                rows: outcome.rows_affected,
            });
            if outcome.first_insert_id.is_some() {
                self.lastrowid = outcome.first_insert_id;
            }
        }
        self.rowcount = Some(total);
        self.cursor = ResultCursor::new(self.cursor_kind, ResultSet::default());

        if history && !ids_reliable {
            warn!("Upsert batch updated existing rows; history not written");
        } else if history {
            let table = Statement::parse(sql, self.config.dialect)
                .ok()
                .and_then(|s| analyze_insert(&s));
            let ids = reconstruct_ids(&self.batches);
            match table {
                Some(table) if !ids.is_empty() => {
                    let layout = self.layout(&table).await?;
                    let now = format_timestamp(self.stamp());
                    let open = self.config.open_interval_end.clone();
                    self.copy_rows(&layout, &ids, &now, &open, user.as_deref()).await?;
                }
                _ => warn!("Batched INSERT produced no usable ids; history not written"),
            }
        }
        Ok(total)
    }

    // ---- history reads ----

    /// Rewrite a read query to its point-in-time equivalent without running it.
    pub fn history_query(&self, sql: &str, as_of: NaiveDateTime) -> HistoryResult<String> {
        let stmt = Statement::parse(sql, self.config.dialect)?;
        Ok(rewrite_history_query(&stmt, &format_timestamp(as_of), &self.config)?.sql)
    }

    /// Run a read query against history as of `as_of`.
    pub async fn execute_history(
        &mut self,
        sql: &str,
        params: &Params,
        as_of: NaiveDateTime,
    ) -> HistoryResult<u64> {
        let rewritten = self.history_query(sql, as_of)?;
        let stmt = Statement::parse(&rewritten, self.config.dialect)?;
        let bound = stmt.bind(params)?;
        let rows = self.driver.query(&bound.sql, &bound.values).await?;
        Ok(self.set_result(rows))
    }

    /// Give rows that predate history tracking an open history row.
    ///
    /// `ids` limits the backfill to those primary keys; `None` covers the
    /// whole table. Rows that already have history are left alone.
    pub async fn supply_history_data(
        &mut self,
        table: &str,
        ids: Option<&[i64]>,
        operate_user: Option<&str>,
    ) -> HistoryResult<SupplyReport> {
        let options = ExecOptions {
            history: None,
            operate_user: operate_user.map(str::to_string),
        };
        let user = self.resolve_user(&options)?;
        let layout = self.layout(table).await?;

        let candidates = match ids {
            Some([]) => {
                return Err(HistoryError::validation(
                    "an explicit id list must not be empty",
                ))
            }
            Some(ids) => {
                let mut found = Vec::new();
                for chunk in ids.chunks(ID_CHUNK) {
                    let rows = self
                        .driver
                        .query(&layout.existing_ids_sql(chunk), &[])
                        .await?;
                    found.extend(rows.first_column_i64());
                }
                found
            }
            None => self
                .driver
                .query(&layout.all_ids_sql(), &[])
                .await?
                .first_column_i64(),
        };
        if candidates.is_empty() {
            return Ok(SupplyReport::default());
        }

        let mut recorded = BTreeSet::new();
        for chunk in candidates.chunks(ID_CHUNK) {
            let rows = self
                .driver
                .query(&layout.recorded_ids_sql(chunk), &[])
                .await?;
            recorded.extend(rows.first_column_i64());
        }
        let missing: Vec<i64> = candidates
            .iter()
            .copied()
            .filter(|id| !recorded.contains(id))
            .collect();

        if !missing.is_empty() {
            let now = format_timestamp(self.stamp());
            let open = self.config.open_interval_end.clone();
            self.copy_rows(&layout, &missing, &now, &open, user.as_deref())
                .await?;
        }
        info!(
            table,
            inserted = missing.len(),
            existing = recorded.len(),
            "Supplied history rows"
        );
        Ok(SupplyReport {
            inserted: missing,
            existing: recorded.into_iter().collect(),
        })
    }

    /// Every change recorded for one row, oldest first.
    pub async fn analysis_process(
        &mut self,
        table: &str,
        base_id: i64,
    ) -> HistoryResult<Vec<ChangeRecord>> {
        let layout = self.layout(table).await?;
        let rows = self
            .driver
            .query(&layout.history_of_sql(), &[Value::Integer(base_id)])
            .await?;
        if rows.is_empty() {
            return Err(HistoryError::HistoryNotFound {
                table: table.to_string(),
                base_id,
            });
        }
        Ok(classify_history(&rows, &layout))
    }

    /// Build the statement that restores a row to the given history row.
    ///
    /// The statement is returned, not executed. Running it through
    /// [`Self::execute_with`] records the restore as a new history row.
    pub async fn rollback(&mut self, table: &str, history_id: i64) -> HistoryResult<RollbackPlan> {
        let layout = self.layout(table).await?;
        if layout.tracked_columns.is_empty() {
            return Err(HistoryError::analysis(format!(
                "table '{}' has no versioned columns to restore",
                table
            )));
        }

        let target = self
            .driver
            .query(&layout.history_row_sql(), &[Value::Integer(history_id)])
            .await?;
        if target.is_empty() {
            return Err(HistoryError::RollbackTargetMissing {
                table: table.to_string(),
                history_id,
            });
        }
        let base_id = target
            .get(0, &layout.base_pk())
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                HistoryError::analysis(format!(
                    "history row {} of '{}' has no {}",
                    history_id,
                    table,
                    layout.base_pk()
                ))
            })?;

        let latest = self
            .driver
            .query(&layout.latest_history_sql(), &[Value::Integer(base_id)])
            .await?;
        if latest.get(0, &layout.pk).and_then(Value::as_i64) == Some(history_id) {
            return Err(HistoryError::RollbackTargetIsCurrent {
                table: table.to_string(),
                history_id,
            });
        }
        let deleted = latest.get(0, BEGIN_COLUMN) == latest.get(0, END_COLUMN);

        let value = |column: &str| target.get(0, column).cloned().unwrap_or(Value::Null);
        let mut params: Vec<Value> = layout.tracked_columns.iter().map(|c| value(c)).collect();
        let (sql, mode) = if deleted {
            let mut columns: Vec<String> =
                layout.tracked_columns.iter().map(|c| quote_ident(c)).collect();
            for scope in &layout.scope_columns {
                columns.push(quote_ident(scope));
                params.push(value(&self.config.base_column(scope)));
            }
            let markers = vec!["?"; columns.len()].join(", ");
            (
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(&layout.table),
                    columns.join(", "),
                    markers
                ),
                RollbackMode::Insert,
            )
        } else {
            let assignments: Vec<String> = layout
                .tracked_columns
                .iter()
                .map(|c| format!("{} = ?", quote_ident(c)))
                .collect();
            params.push(Value::Integer(base_id));
            (
                format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    quote_ident(&layout.table),
                    assignments.join(", "),
                    quote_ident(&layout.pk)
                ),
                RollbackMode::Update,
            )
        };

        info!(table, history_id, base_id, mode = ?mode, "Prepared rollback");
        Ok(RollbackPlan {
            table: table.to_string(),
            sql,
            params,
            base_id,
            history_id,
            mode,
        })
    }

    // ---- results ----

    pub fn fetchone(&mut self) -> Option<FetchedRow> {
        self.cursor.fetchone()
    }

    pub fn fetchmany(&mut self, size: usize) -> Vec<FetchedRow> {
        self.cursor.fetchmany(size)
    }

    pub fn fetchall(&mut self) -> Vec<FetchedRow> {
        self.cursor.fetchall()
    }

    pub fn scroll(&mut self, value: i64, mode: ScrollMode) -> HistoryResult<()> {
        self.cursor.scroll(value, mode)
    }

    /// Column names of the last result.
    pub fn description(&self) -> &[String] {
        self.cursor.description()
    }

    /// Rows affected by the last mutation, or rows of the last result when known.
    pub fn rowcount(&self) -> Option<u64> {
        self.rowcount.or_else(|| self.cursor.rowcount())
    }

    /// First id generated by the most recent INSERT.
    pub fn lastrowid(&self) -> Option<i64> {
        self.lastrowid
    }

    /// `(first_id, rows)` of each INSERT run by the last `executemany`.
    pub fn insert_batches(&self) -> &[InsertBatch] {
        &self.batches
    }

    // ---- transactions ----

    pub async fn begin(&mut self) -> HistoryResult<()> {
        self.driver.begin().await
    }

    pub async fn commit(&mut self) -> HistoryResult<()> {
        self.driver.commit().await
    }

    pub async fn rollback_transaction(&mut self) -> HistoryResult<()> {
        self.driver.rollback().await
    }

    pub async fn close(&mut self) -> HistoryResult<()> {
        self.cursor = ResultCursor::new(self.cursor_kind, ResultSet::default());
        self.driver.close().await
    }

    // ---- internals ----

    fn resolve_user(&self, options: &ExecOptions) -> HistoryResult<Option<String>> {
        let user = options
            .operate_user
            .clone()
            .or_else(|| self.config.operate_user.clone());
        match user {
            None => Ok(None),
            Some(user) if user.is_empty() => Ok(None),
            Some(user) if user.chars().any(char::is_control) => Err(
                HistoryError::invalid_operate_user("must not contain control characters"),
            ),
            Some(user) if user.chars().count() > self.config.max_operate_user_len => {
                Err(HistoryError::invalid_operate_user(format!(
                    "longer than {} characters",
                    self.config.max_operate_user_len
                )))
            }
            Some(user) => Ok(Some(user)),
        }
    }

    /// Current time, strictly after every earlier stamp of this session.
    fn stamp(&mut self) -> NaiveDateTime {
        let mut now = self.clock.now().trunc_subsecs(6);
        if let Some(last) = self.last_stamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(now);
        now
    }

    async fn table_columns(&mut self, table: &str) -> HistoryResult<Vec<String>> {
        if let Some(columns) = self.columns.get(table) {
            return Ok(columns.clone());
        }
        let columns = self.driver.table_columns(table).await?;
        if !columns.is_empty() {
            self.columns.insert(table.to_string(), columns.clone());
        }
        Ok(columns)
    }

    async fn layout(&mut self, table: &str) -> HistoryResult<HistoryLayout> {
        let columns = self.table_columns(table).await?;
        HistoryLayout::new(table, &columns, &self.config)
    }

    async fn snapshot(
        &mut self,
        targets: &[String],
        aliases: &AliasMap,
        predicate: &str,
        params: &[Value],
    ) -> HistoryResult<Vec<(HistoryLayout, Vec<i64>)>> {
        let mut found: Vec<(HistoryLayout, BTreeSet<i64>)> = Vec::new();
        for key in targets {
            let table = aliases
                .get(key)
                .ok_or_else(|| {
                    HistoryError::analysis_with_code(
                        format!("'{}' is not bound to a table", key),
                        ErrorCode::AnaAliasUnbound,
                    )
                })?
                .to_string();
            let layout = self.layout(&table).await?;
            let sql = snapshot_sql(key, &layout.pk, predicate);
            let ids = self.driver.query(&sql, params).await?.first_column_i64();
            debug!(table = %table, rows = ids.len(), "Snapshotted affected rows");
            match found
                .iter_mut()
                .find(|(l, _)| l.table.eq_ignore_ascii_case(&table))
            {
                Some((_, existing)) => existing.extend(ids),
                None => found.push((layout, ids.into_iter().collect())),
            }
        }
        Ok(found
            .into_iter()
            .map(|(layout, ids)| (layout, ids.into_iter().collect()))
            .collect())
    }

    async fn close_intervals(
        &mut self,
        layout: &HistoryLayout,
        ids: &[i64],
        now: &str,
    ) -> HistoryResult<()> {
        let params = [
            Value::from(now),
            Value::from(self.config.open_interval_end.as_str()),
        ];
        for chunk in ids.chunks(ID_CHUNK) {
            self.driver
                .execute(&layout.close_intervals_sql(chunk), &params)
                .await?;
        }
        Ok(())
    }

    async fn copy_rows(
        &mut self,
        layout: &HistoryLayout,
        ids: &[i64],
        begin: &str,
        end: &str,
        user: Option<&str>,
    ) -> HistoryResult<()> {
        let params = [Value::from(begin), Value::from(end), Value::from(user)];
        for chunk in ids.chunks(ID_CHUNK) {
            self.driver
                .execute(&layout.copy_rows_sql(chunk), &params)
                .await?;
        }
        debug!(table = %layout.history_table, rows = ids.len(), "Wrote history rows");
        Ok(())
    }
}

/// Builds sessions that share one configuration and clock.
#[derive(Clone)]
pub struct SessionFactory {
    config: Arc<HistoryConfig>,
    clock: Arc<dyn Clock>,
    cursor_kind: CursorKind,
}

impl SessionFactory {
    pub fn new(config: HistoryConfig) -> HistoryResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            cursor_kind: CursorKind::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cursor_kind(mut self, kind: CursorKind) -> Self {
        self.cursor_kind = kind;
        self
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn session<D: Driver>(&self, driver: D) -> HistorySession<D> {
        HistorySession::new(
            driver,
            Arc::clone(&self.config),
            Arc::clone(&self.clock),
            self.cursor_kind,
        )
    }

    /// A session driven from synchronous code.
    pub fn blocking<D: Driver>(&self, driver: D) -> HistoryResult<BlockingSession<D>> {
        BlockingSession::new(self.session(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::clock::{parse_timestamp, ManualClock};
    use crate::traits::MockDriver;
    use mockall::Sequence;

    const NOW: &str = "2024-01-01 00:00:00.000000";

    fn factory() -> SessionFactory {
        let clock = ManualClock::new(parse_timestamp(NOW).unwrap());
        SessionFactory::new(HistoryConfig::default())
            .unwrap()
            .with_clock(Arc::new(clock))
    }

    fn columns(mock: &mut MockDriver) {
        mock.expect_table_columns()
            .returning(|_| Ok(vec!["id".to_string(), "status".to_string()]));
    }

    fn ids(values: &[i64]) -> ResultSet {
        ResultSet::new(
            vec!["id".to_string()],
            values.iter().map(|v| vec![Value::Integer(*v)]).collect(),
        )
    }

    fn affected(rows: u64) -> ExecOutcome {
        ExecOutcome {
            rows_affected: rows,
            first_insert_id: None,
        }
    }

    #[tokio::test]
    async fn test_update_closes_then_mutates_then_reopens() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        mock.expect_query()
            .withf(|sql, params| {
                sql == "SELECT `orders`.`id` FROM orders WHERE status = ?"
                    && params == [Value::from("new")]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ids(&[1, 2])));
        mock.expect_execute()
            .withf(|sql, params| {
                sql.starts_with("UPDATE `orders_history` SET `record_end_time` = ?")
                    && sql.contains("IN (1, 2)")
                    && params[0] == Value::from(NOW)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(2)));
        mock.expect_execute()
            .withf(|sql, params| {
                sql == "UPDATE orders SET status = ? WHERE status = ?"
                    && params == [Value::from("paid"), Value::from("new")]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(2)));
        mock.expect_execute()
            .withf(|sql, params| {
                sql.starts_with("INSERT INTO `orders_history`")
                    && params
                        == [
                            Value::from(NOW),
                            Value::from("9999-12-31 23:59:59"),
                            Value::from("bob"),
                        ]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(2)));

        let mut session = factory().session(mock);
        let n = session
            .execute_with(
                "UPDATE orders SET status = %s WHERE status = %s",
                &Params::positional(["paid", "new"]),
                &ExecOptions::user("bob"),
            )
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(session.rowcount(), Some(2));
    }

    fn expect_snapshot(
        mock: &mut MockDriver,
        seq: &mut Sequence,
        sql: &'static str,
        params: Vec<Value>,
        found: &'static [i64],
    ) {
        mock.expect_query()
            .withf(move |s, p| s == sql && p == params.as_slice())
            .times(1)
            .in_sequence(seq)
            .returning(move |_, _| Ok(ids(found)));
    }

    /// One history write against `history_table` covering exactly `id_list`.
    fn expect_history_write(
        mock: &mut MockDriver,
        seq: &mut Sequence,
        verb: &'static str,
        history_table: &'static str,
        id_list: &'static str,
        marker: bool,
    ) {
        let head = format!("{} `{}`", verb, history_table);
        let ids = format!("IN ({})", id_list);
        mock.expect_execute()
            .withf(move |sql, params| {
                sql.starts_with(&head)
                    && sql.contains(&ids)
                    && (!marker || params[0] == params[1])
            })
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(affected(1)));
    }

    #[tokio::test]
    async fn test_delete_writes_marker_before_deleting() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        mock.expect_query()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ids(&[5])));
        mock.expect_execute()
            .withf(|sql, _| sql.starts_with("UPDATE `orders_history`"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(1)));
        mock.expect_execute()
            .withf(|sql, params| {
                sql.starts_with("INSERT INTO `orders_history`") && params[0] == params[1]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(1)));
        mock.expect_execute()
            .withf(|sql, _| sql == "DELETE FROM orders WHERE id = ?")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(1)));

        let mut session = factory().session(mock);
        session
            .execute("DELETE FROM orders WHERE id = %s", &Params::positional([5]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_using_snapshots_each_table() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `a`.`id` FROM a JOIN b ON a.id = b.aid WHERE a.k = ?",
            vec![Value::Integer(9)],
            &[2, 1, 2],
        );
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `b`.`id` FROM a JOIN b ON a.id = b.aid WHERE a.k = ?",
            vec![Value::Integer(9)],
            &[10, 11],
        );
        expect_history_write(&mut mock, &mut seq, "UPDATE", "a_history", "1, 2", false);
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "a_history", "1, 2", true);
        expect_history_write(&mut mock, &mut seq, "UPDATE", "b_history", "10, 11", false);
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "b_history", "10, 11", true);
        mock.expect_execute()
            .withf(|sql, params| {
                sql == "DELETE FROM a, b USING a JOIN b ON a.id = b.aid WHERE a.k = ?"
                    && params == [Value::Integer(9)]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(4)));

        let mut session = factory().session(mock);
        let n = session
            .execute(
                "DELETE FROM a, b USING a JOIN b ON a.id = b.aid WHERE a.k = %s",
                &Params::positional([9]),
            )
            .await
            .unwrap();
        assert_eq!(n, 4);
    }

    #[tokio::test]
    async fn test_delete_target_list_snapshots_each_alias() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `t1`.`id` FROM a t1 JOIN b t2 ON t1.bid = t2.id WHERE t1.k = ?",
            vec![Value::from("k")],
            &[3, 3],
        );
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `t2`.`id` FROM a t1 JOIN b t2 ON t1.bid = t2.id WHERE t1.k = ?",
            vec![Value::from("k")],
            &[7],
        );
        expect_history_write(&mut mock, &mut seq, "UPDATE", "a_history", "3", false);
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "a_history", "3", true);
        expect_history_write(&mut mock, &mut seq, "UPDATE", "b_history", "7", false);
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "b_history", "7", true);
        mock.expect_execute()
            .withf(|sql, _| {
                sql == "DELETE t1, t2 FROM a t1 JOIN b t2 ON t1.bid = t2.id WHERE t1.k = ?"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(2)));

        let mut session = factory().session(mock);
        session
            .execute(
                "DELETE t1, t2 FROM a t1 JOIN b t2 ON t1.bid = t2.id WHERE t1.k = %s",
                &Params::positional(["k"]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_self_join_delete_merges_ids_per_table() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `p`.`id` FROM a p JOIN a c ON c.pid = p.id",
            vec![],
            &[1],
        );
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `c`.`id` FROM a p JOIN a c ON c.pid = p.id",
            vec![],
            &[4, 1],
        );
        expect_history_write(&mut mock, &mut seq, "UPDATE", "a_history", "1, 4", false);
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "a_history", "1, 4", true);
        mock.expect_execute()
            .withf(|sql, _| sql == "DELETE p, c FROM a p JOIN a c ON c.pid = p.id")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(2)));

        let mut session = factory().session(mock);
        session
            .execute("DELETE p, c FROM a p JOIN a c ON c.pid = p.id", &Params::None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_table_update_closes_and_reopens_each_table() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `t1`.`id` FROM a t1, b t2 WHERE t1.bid=t2.id AND t1.k = ?",
            vec![Value::from("k")],
            &[1, 2],
        );
        expect_snapshot(
            &mut mock,
            &mut seq,
            "SELECT `t2`.`id` FROM a t1, b t2 WHERE t1.bid=t2.id AND t1.k = ?",
            vec![Value::from("k")],
            &[5, 5],
        );
        expect_history_write(&mut mock, &mut seq, "UPDATE", "a_history", "1, 2", false);
        expect_history_write(&mut mock, &mut seq, "UPDATE", "b_history", "5", false);
        mock.expect_execute()
            .withf(|sql, params| {
                sql == "UPDATE a t1, b t2 SET t1.x=?, t2.y=? WHERE t1.bid=t2.id AND t1.k = ?"
                    && params == [Value::from("x"), Value::from("y"), Value::from("k")]
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(3)));
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "a_history", "1, 2", false);
        expect_history_write(&mut mock, &mut seq, "INSERT INTO", "b_history", "5", false);

        let mut session = factory().session(mock);
        let n = session
            .execute(
                "UPDATE a t1, b t2 SET t1.x=%s, t2.y=%s WHERE t1.bid=t2.id AND t1.k = %s",
                &Params::positional(["x", "y", "k"]),
            )
            .await
            .unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn test_empty_snapshot_skips_history() {
        let mut mock = MockDriver::new();
        columns(&mut mock);
        mock.expect_query().times(1).returning(|_, _| Ok(ids(&[])));
        mock.expect_execute()
            .withf(|sql, _| sql == "UPDATE orders SET status = 'x' WHERE id = 99")
            .times(1)
            .returning(|_, _| Ok(affected(0)));

        let mut session = factory().session(mock);
        let n = session
            .execute("UPDATE orders SET status = 'x' WHERE id = 99", &Params::None)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_insert_writes_open_rows_for_generated_ids() {
        let mut mock = MockDriver::new();
        let mut seq = Sequence::new();
        columns(&mut mock);
        mock.expect_execute()
            .withf(|sql, _| sql == "INSERT INTO orders (status) VALUES (?), (?)")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(ExecOutcome {
                    rows_affected: 2,
                    first_insert_id: Some(7),
                })
            });
        mock.expect_execute()
            .withf(|sql, _| sql.ends_with("WHERE `id` IN (7, 8)"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(affected(2)));

        let mut session = factory().session(mock);
        session
            .execute(
                "INSERT INTO orders (status) VALUES (%s), (%s)",
                &Params::positional(["a", "b"]),
            )
            .await
            .unwrap();
        assert_eq!(session.lastrowid(), Some(7));
    }

    #[tokio::test]
    async fn test_upsert_that_updated_rows_writes_no_history() {
        let mut mock = MockDriver::new();
        mock.expect_execute()
            .withf(|sql, _| sql.starts_with("INSERT INTO orders (id, status) VALUES (?, ?)"))
            .times(1)
            .returning(|_, _| {
                Ok(ExecOutcome {
                    rows_affected: 2,
                    first_insert_id: Some(3),
                })
            });

        let mut session = factory().session(mock);
        let n = session
            .execute(
                "INSERT INTO orders (id, status) VALUES (%s, %s) \
                 ON DUPLICATE KEY UPDATE status = VALUES(status)",
                &Params::positional([Value::Integer(3), Value::from("paid")]),
            )
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_executemany_upsert_with_updated_rows_skips_history() {
        let mut mock = MockDriver::new();
        mock.expect_execute()
            .withf(|sql, params| {
                sql == "INSERT INTO orders (status) VALUES (?),(?) \
                        ON DUPLICATE KEY UPDATE status = VALUES(status)"
                    && params.len() == 2
            })
            .times(1)
            .returning(|_, _| {
                Ok(ExecOutcome {
                    rows_affected: 3,
                    first_insert_id: Some(10),
                })
            });

        let mut session = factory().session(mock);
        let rows = [Params::positional(["a"]), Params::positional(["b"])];
        let n = session
            .executemany(
                "INSERT INTO orders (status) VALUES (%s) \
                 ON DUPLICATE KEY UPDATE status = VALUES(status)",
                &rows,
            )
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(session.insert_batches().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_operate_user_fails_before_any_call() {
        let mock = MockDriver::new();
        let mut session = factory().session(mock);
        let err = session
            .execute_with(
                "DELETE FROM orders",
                &Params::None,
                &ExecOptions::user("bad\nuser"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HisInvalidUser);
    }

    #[tokio::test]
    async fn test_unrecognized_statement_passes_through() {
        let mut mock = MockDriver::new();
        mock.expect_execute()
            .withf(|sql, params| sql == "SELECT 1; SELECT 2" && params.is_empty())
            .times(1)
            .returning(|_, _| Ok(affected(0)));
        let mut session = factory().session(mock);
        session.execute("SELECT 1; SELECT 2", &Params::None).await.unwrap();
    }

    #[tokio::test]
    async fn test_history_switch_off_runs_plain_statement() {
        let mut mock = MockDriver::new();
        mock.expect_execute()
            .withf(|sql, _| sql == "DELETE FROM orders")
            .times(1)
            .returning(|_, _| Ok(affected(3)));
        let mut session = factory().session(mock);
        let n = session
            .execute_with("DELETE FROM orders", &Params::None, &ExecOptions::without_history())
            .await
            .unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn test_rollback_target_is_current() {
        let mut mock = MockDriver::new();
        columns(&mut mock);
        let row = || {
            ResultSet::new(
                vec!["id".into(), "base_id".into()],
                vec![vec![Value::Integer(4), Value::Integer(1)]],
            )
        };
        mock.expect_query().times(2).returning(move |_, _| Ok(row()));
        let mut session = factory().session(mock);
        let err = session.rollback("orders", 4).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::HisRollbackCurrent);
    }

    #[tokio::test]
    async fn test_supply_rejects_empty_id_list() {
        let mut mock = MockDriver::new();
        columns(&mut mock);
        let mut session = factory().session(mock);
        let err = session
            .supply_history_data("orders", Some(&[][..]), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
    }

    #[test]
    fn test_stamps_strictly_increase_on_a_frozen_clock() {
        let mut session = factory().session(MockDriver::new());
        let a = session.stamp();
        let b = session.stamp();
        assert_eq!(b - a, Duration::microseconds(1));
    }
}
