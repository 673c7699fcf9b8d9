//! One-call helpers over a [`HistorySession`].
//!
//! Helpers taking `commit: bool` commit on success and roll back on failure
//! when it is set. With `commit == false` the caller owns the transaction.

use tracing::warn;

use crate::cursor::FetchedRow;
use crate::error::HistoryResult;
use crate::history::{ChangeRecord, ExecOptions, HistorySession};
use crate::traits::Driver;
use crate::types::{InsertBatch, Params};

/// Execute one mutation. Returns `(lastrowid, rowcount)`.
pub async fn operate<D: Driver>(
    session: &mut HistorySession<D>,
    sql: &str,
    params: &Params,
    commit: bool,
    options: &ExecOptions,
) -> HistoryResult<(Option<i64>, u64)> {
    let result = session.execute_with(sql, params, options).await;
    let affected = finish(session, result, commit).await?;
    Ok((session.lastrowid(), affected))
}

/// Execute one statement for many argument rows.
///
/// Returns the `(first_id, rowcount)` pair of every executed chunk and the
/// total row count.
pub async fn batch_operate<D: Driver>(
    session: &mut HistorySession<D>,
    sql: &str,
    rows: &[Params],
    commit: bool,
    options: &ExecOptions,
) -> HistoryResult<(Vec<InsertBatch>, u64)> {
    let result = session.executemany_with(sql, rows, options).await;
    let total = finish(session, result, commit).await?;
    Ok((session.insert_batches().to_vec(), total))
}

/// Restore a row to the given history row and commit.
///
/// The restore is itself recorded in history. Returns the affected row count.
pub async fn rollback_history_data<D: Driver>(
    session: &mut HistorySession<D>,
    table: &str,
    history_id: i64,
    operate_user: Option<&str>,
) -> HistoryResult<u64> {
    let result = async {
        let plan = session.rollback(table, history_id).await?;
        let options = ExecOptions {
            history: Some(true),
            operate_user: operate_user.map(str::to_string),
        };
        session
            .execute_with(&plan.sql, &Params::Positional(plan.params), &options)
            .await
    }
    .await;
    finish(session, result, true).await
}

/// Change history of one row, oldest first.
pub async fn history_change_process<D: Driver>(
    session: &mut HistorySession<D>,
    table: &str,
    base_id: i64,
) -> HistoryResult<Vec<ChangeRecord>> {
    session.analysis_process(table, base_id).await
}

/// Run a query and return every row.
pub async fn query_all<D: Driver>(
    session: &mut HistorySession<D>,
    sql: &str,
    params: &Params,
) -> HistoryResult<Vec<FetchedRow>> {
    session.execute(sql, params).await?;
    Ok(session.fetchall())
}

/// Run a query and return its first row, if any.
pub async fn query_one<D: Driver>(
    session: &mut HistorySession<D>,
    sql: &str,
    params: &Params,
) -> HistoryResult<Option<FetchedRow>> {
    session.execute(sql, params).await?;
    Ok(session.fetchone())
}

async fn finish<D: Driver>(
    session: &mut HistorySession<D>,
    result: HistoryResult<u64>,
    commit: bool,
) -> HistoryResult<u64> {
    match result {
        Ok(n) => {
            if commit {
                session.commit().await?;
            }
            Ok(n)
        }
        Err(e) => {
            if commit {
                if let Err(rollback_err) = session.rollback_transaction().await {
                    warn!(error = %rollback_err, "Rollback after failed statement also failed");
                }
            }
            Err(e)
        }
    }
}
