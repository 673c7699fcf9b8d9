//! Synchronous facade over [`HistorySession`].
//!
//! The session's async protocol runs on a private current-thread runtime.
//! Do not use a `BlockingSession` from inside another tokio runtime.

use chrono::NaiveDateTime;
use tokio::runtime::{Builder, Runtime};

use crate::cursor::{FetchedRow, ScrollMode};
use crate::error::HistoryResult;
use crate::history::{ChangeRecord, ExecOptions, HistorySession, RollbackPlan, SupplyReport};
use crate::traits::Driver;
use crate::types::{InsertBatch, Params};

pub struct BlockingSession<D: Driver> {
    runtime: Runtime,
    inner: HistorySession<D>,
}

impl<D: Driver> BlockingSession<D> {
    pub fn new(inner: HistorySession<D>) -> HistoryResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime, inner })
    }

    pub fn session(&self) -> &HistorySession<D> {
        &self.inner
    }

    pub fn session_mut(&mut self) -> &mut HistorySession<D> {
        &mut self.inner
    }

    pub fn into_inner(self) -> HistorySession<D> {
        self.inner
    }

    pub fn execute(&mut self, sql: &str, params: &Params) -> HistoryResult<u64> {
        self.runtime.block_on(self.inner.execute(sql, params))
    }

    pub fn execute_with(
        &mut self,
        sql: &str,
        params: &Params,
        options: &ExecOptions,
    ) -> HistoryResult<u64> {
        self.runtime
            .block_on(self.inner.execute_with(sql, params, options))
    }

    pub fn executemany(&mut self, sql: &str, rows: &[Params]) -> HistoryResult<u64> {
        self.runtime.block_on(self.inner.executemany(sql, rows))
    }

    pub fn executemany_with(
        &mut self,
        sql: &str,
        rows: &[Params],
        options: &ExecOptions,
    ) -> HistoryResult<u64> {
        self.runtime
            .block_on(self.inner.executemany_with(sql, rows, options))
    }

    pub fn history_query(&self, sql: &str, as_of: NaiveDateTime) -> HistoryResult<String> {
        self.inner.history_query(sql, as_of)
    }

    pub fn execute_history(
        &mut self,
        sql: &str,
        params: &Params,
        as_of: NaiveDateTime,
    ) -> HistoryResult<u64> {
        self.runtime
            .block_on(self.inner.execute_history(sql, params, as_of))
    }

    pub fn supply_history_data(
        &mut self,
        table: &str,
        ids: Option<&[i64]>,
        operate_user: Option<&str>,
    ) -> HistoryResult<SupplyReport> {
        self.runtime
            .block_on(self.inner.supply_history_data(table, ids, operate_user))
    }

    pub fn analysis_process(&mut self, table: &str, base_id: i64) -> HistoryResult<Vec<ChangeRecord>> {
        self.runtime
            .block_on(self.inner.analysis_process(table, base_id))
    }

    pub fn rollback(&mut self, table: &str, history_id: i64) -> HistoryResult<RollbackPlan> {
        self.runtime.block_on(self.inner.rollback(table, history_id))
    }

    pub fn fetchone(&mut self) -> Option<FetchedRow> {
        self.inner.fetchone()
    }

    pub fn fetchmany(&mut self, size: usize) -> Vec<FetchedRow> {
        self.inner.fetchmany(size)
    }

    pub fn fetchall(&mut self) -> Vec<FetchedRow> {
        self.inner.fetchall()
    }

    pub fn scroll(&mut self, value: i64, mode: ScrollMode) -> HistoryResult<()> {
        self.inner.scroll(value, mode)
    }

    pub fn description(&self) -> &[String] {
        self.inner.description()
    }

    pub fn rowcount(&self) -> Option<u64> {
        self.inner.rowcount()
    }

    pub fn lastrowid(&self) -> Option<i64> {
        self.inner.lastrowid()
    }

    pub fn insert_batches(&self) -> &[InsertBatch] {
        self.inner.insert_batches()
    }

    pub fn begin(&mut self) -> HistoryResult<()> {
        self.runtime.block_on(self.inner.begin())
    }

    pub fn commit(&mut self) -> HistoryResult<()> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback_transaction(&mut self) -> HistoryResult<()> {
        self.runtime.block_on(self.inner.rollback_transaction())
    }

    pub fn close(&mut self) -> HistoryResult<()> {
        self.runtime.block_on(self.inner.close())
    }
}
