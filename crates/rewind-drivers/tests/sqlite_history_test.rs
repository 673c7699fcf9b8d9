//! Integration tests for history maintenance against in-memory SQLite.
//!
//! Every test drives a real session over a real database and inspects the
//! history table it leaves behind.

#![cfg(feature = "sqlite")]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rewind_core::history::parse_timestamp;
use rewind_core::{
    ops, ChangeKind, CursorKind, ExecOptions, FetchedRow, HistoryConfig, HistorySession,
    ManualClock, Params, RollbackMode, SessionFactory, SqlDialect, Value,
};
use rewind_drivers::SqliteDriver;

const SCHEMA: &str = "
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        status TEXT,
        amount INTEGER
    );
    CREATE TABLE orders_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        status TEXT,
        amount INTEGER,
        record_begin_time TEXT,
        record_end_time TEXT,
        record_operate_user TEXT,
        base_id INTEGER
    );
";

/// Two linked tables: every `a` row points at a `b` row through `bid`.
const LINKED_SCHEMA: &str = "
    CREATE TABLE a (id INTEGER PRIMARY KEY AUTOINCREMENT, bid INTEGER, x TEXT);
    CREATE TABLE a_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bid INTEGER,
        x TEXT,
        record_begin_time TEXT,
        record_end_time TEXT,
        record_operate_user TEXT,
        base_id INTEGER
    );
    CREATE TABLE b (id INTEGER PRIMARY KEY AUTOINCREMENT, y TEXT);
    CREATE TABLE b_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        y TEXT,
        record_begin_time TEXT,
        record_end_time TEXT,
        record_operate_user TEXT,
        base_id INTEGER
    );
";

const OPEN: &str = "9999-12-31 23:59:59";

fn start() -> NaiveDateTime {
    parse_timestamp("2024-01-01 10:00:00").unwrap()
}

fn config() -> HistoryConfig {
    HistoryConfig::builder()
        .dialect(SqlDialect::Sqlite)
        .build()
        .unwrap()
}

fn setup_with(config: HistoryConfig) -> (HistorySession<SqliteDriver>, Arc<ManualClock>) {
    let driver = SqliteDriver::open_in_memory().unwrap();
    driver.connection().unwrap().execute_batch(SCHEMA).unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let session = SessionFactory::new(config)
        .unwrap()
        .with_clock(clock.clone())
        .session(driver);
    (session, clock)
}

fn setup() -> (HistorySession<SqliteDriver>, Arc<ManualClock>) {
    setup_with(config())
}

/// `(base_id, begin, end, operate_user)` of every history row, in id order.
fn history(session: &HistorySession<SqliteDriver>) -> Vec<(i64, String, String, Option<String>)> {
    let conn = session.driver().connection().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT base_id, record_begin_time, record_end_time, record_operate_user \
             FROM orders_history ORDER BY id",
        )
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Check every logical row of `history_table`: begin times strictly increase
/// with the history id, each interval ends where the next begins unless it
/// is a delete marker, and at most one interval is open.
fn assert_history_invariants(session: &HistorySession<SqliteDriver>, history_table: &str) {
    let conn = session.driver().connection().unwrap();
    let mut stmt = conn
        .prepare(&format!(
            "SELECT base_id, record_begin_time, record_end_time FROM {} ORDER BY base_id, id",
            history_table
        ))
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let mut by_base: BTreeMap<i64, Vec<(String, String)>> = BTreeMap::new();
    for (base_id, begin, end) in rows {
        by_base.entry(base_id).or_default().push((begin, end));
    }
    for (base_id, intervals) in &by_base {
        for pair in intervals.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert!(prev.0 < next.0, "base_id {}: {:?} does not follow {:?}", base_id, next, prev);
            if prev.0 != prev.1 {
                assert_eq!(prev.1, next.0, "base_id {}: gap between {:?} and {:?}", base_id, prev, next);
            }
        }
        let open = intervals.iter().filter(|(_, end)| end == OPEN).count();
        assert!(open <= 1, "base_id {} has {} open intervals", base_id, open);
    }
}

/// Insert, update twice and delete order 1, one minute apart.
async fn lifecycle(session: &mut HistorySession<SqliteDriver>, clock: &ManualClock) {
    session
        .execute_with(
            "INSERT INTO orders (status, amount) VALUES (?, ?)",
            &Params::positional([Value::from("new"), Value::Integer(10)]),
            &ExecOptions::user("alice"),
        )
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    session
        .execute(
            "UPDATE orders SET status = ? WHERE id = ?",
            &Params::positional([Value::from("paid"), Value::Integer(1)]),
        )
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    session
        .execute(
            "UPDATE orders SET amount = :amount WHERE id = :id",
            &Params::named([("amount", 20), ("id", 1)]),
        )
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    session
        .execute("DELETE FROM orders WHERE id = ?", &Params::positional([1]))
        .await
        .unwrap();
}

/// Insert, update, update and delete leave four contiguous history rows.
#[tokio::test]
async fn test_lifecycle_history_rows() {
    let (mut session, clock) = setup();
    lifecycle(&mut session, &clock).await;

    let rows = history(&session);
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.0 == 1));
    assert_eq!(rows[0].1, "2024-01-01 10:00:00.000000");
    assert_eq!(rows[0].3.as_deref(), Some("alice"));
    assert_eq!(rows[1].3, None);

    // Each interval ends where the next begins; the delete marker is empty.
    for pair in rows.windows(2) {
        assert_eq!(pair[0].2, pair[1].1);
        assert!(pair[0].1 < pair[1].1);
    }
    assert_eq!(rows[3].1, rows[3].2);
    assert!(rows.iter().all(|r| r.2 != OPEN));
    assert_history_invariants(&session, "orders_history");
}

/// analysis_process classifies the four rows and diffs the updates.
#[tokio::test]
async fn test_analysis_process_classifies_changes() {
    let (mut session, clock) = setup();
    lifecycle(&mut session, &clock).await;

    let changes = session.analysis_process("orders", 1).await.unwrap();
    let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::Insert,
            ChangeKind::Update,
            ChangeKind::Update,
            ChangeKind::Delete
        ]
    );
    let first_update = &changes[1].changes;
    assert_eq!(first_update.len(), 1);
    assert_eq!(first_update["status"].original, Value::from("new"));
    assert_eq!(first_update["status"].current, Value::from("paid"));
    assert_eq!(changes[2].changes["amount"].current, Value::Integer(20));

    let err = session.analysis_process("orders", 42).await.unwrap_err();
    assert_eq!(err.code().as_str(), "HIS_004");
}

/// Rolling a deleted row back to its first update re-inserts it and the
/// restore shows up as a fifth, reversing update.
#[tokio::test]
async fn test_rollback_round_trip() {
    let (mut session, clock) = setup();
    lifecycle(&mut session, &clock).await;
    clock.advance(Duration::minutes(1));

    let plan = session.rollback("orders", 2).await.unwrap();
    assert_eq!(plan.mode, RollbackMode::Insert);
    assert_eq!(plan.base_id, 1);

    let restored = ops::rollback_history_data(&mut session, "orders", 2, Some("admin"))
        .await
        .unwrap();
    assert_eq!(restored, 1);

    let current = ops::query_one(
        &mut session,
        "SELECT status, amount FROM orders WHERE id = ?",
        &Params::positional([1]),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        current,
        FetchedRow::Tuple(vec![Value::from("paid"), Value::Integer(10)])
    );

    let changes = session.analysis_process("orders", 1).await.unwrap();
    assert_eq!(changes.len(), 5);
    let last = &changes[4];
    assert_eq!(last.kind, ChangeKind::Update);
    assert_eq!(last.operate_user.as_deref(), Some("admin"));
    assert_eq!(last.end, Value::from(OPEN));
    assert_eq!(last.changes.len(), 1);
    assert_eq!(last.changes["amount"].original, Value::Integer(20));
    assert_eq!(last.changes["amount"].current, Value::Integer(10));

    // The restored row is current again, so updating it works through history.
    let plan = session.rollback("orders", 1).await.unwrap();
    assert_eq!(plan.mode, RollbackMode::Update);
    let err = session.rollback("orders", 5).await.unwrap_err();
    assert_eq!(err.code().as_str(), "HIS_002");
    let err = session.rollback("orders", 99).await.unwrap_err();
    assert_eq!(err.code().as_str(), "HIS_003");
    assert_history_invariants(&session, "orders_history");
}

/// Point-in-time reads see the row as it was at each instant.
#[tokio::test]
async fn test_execute_history_as_of() {
    let (mut session, clock) = setup();
    lifecycle(&mut session, &clock).await;

    let sql = "SELECT o.status, o.amount FROM orders o WHERE o.id = ?";
    let at = |seconds: i64| start() + Duration::seconds(seconds);

    session
        .execute_history(sql, &Params::positional([1]), at(30))
        .await
        .unwrap();
    assert_eq!(
        session.fetchall(),
        vec![FetchedRow::Tuple(vec![Value::from("new"), Value::Integer(10)])]
    );

    session
        .execute_history(sql, &Params::positional([1]), at(90))
        .await
        .unwrap();
    assert_eq!(
        session.fetchone(),
        Some(FetchedRow::Tuple(vec![Value::from("paid"), Value::Integer(10)]))
    );

    let n = session
        .execute_history(sql, &Params::positional([1]), at(600))
        .await
        .unwrap();
    assert_eq!(n, 0);

    let rewritten = session.history_query(sql, at(30)).unwrap();
    assert!(rewritten.contains("orders_history o"));
}

/// Insert b1 and a row of `a` pointing at it, rename b1 to b2 a minute
/// later and delete the `a` row a minute after that.
async fn linked_timeline() -> HistorySession<SqliteDriver> {
    let (mut session, clock) = setup();
    session
        .driver()
        .connection()
        .unwrap()
        .execute_batch(LINKED_SCHEMA)
        .unwrap();
    session
        .execute("INSERT INTO b (y) VALUES (?)", &Params::positional(["b1"]))
        .await
        .unwrap();
    session
        .execute(
            "INSERT INTO a (bid, x) VALUES (?, ?)",
            &Params::positional([Value::Integer(1), Value::from("a1")]),
        )
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    session
        .execute("UPDATE b SET y = 'b2' WHERE id = 1", &Params::None)
        .await
        .unwrap();
    clock.advance(Duration::minutes(1));
    session
        .execute("DELETE FROM a WHERE id = 1", &Params::None)
        .await
        .unwrap();
    assert_history_invariants(&session, "a_history");
    assert_history_invariants(&session, "b_history");
    session
}

fn texts(rows: Vec<FetchedRow>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|row| match row {
            FetchedRow::Tuple(values) => values,
            other => panic!("expected a tuple row, got {:?}", other),
        })
        .collect()
}

/// Joins, IN subqueries, CTEs and UNION branches each read every table as of
/// the same instant.
#[tokio::test]
async fn test_execute_history_across_tables() {
    let mut session = linked_timeline().await;
    let at = |seconds: i64| start() + Duration::seconds(seconds);

    let join = "SELECT t1.id, t1.x, t2.y FROM a t1 JOIN b t2 ON t1.bid = t2.id WHERE t1.id = ?";
    session
        .execute_history(join, &Params::positional([1]), at(30))
        .await
        .unwrap();
    assert_eq!(
        texts(session.fetchall()),
        vec![vec![Value::Integer(1), Value::from("a1"), Value::from("b1")]]
    );
    session
        .execute_history(join, &Params::positional([1]), at(90))
        .await
        .unwrap();
    assert_eq!(
        texts(session.fetchall()),
        vec![vec![Value::Integer(1), Value::from("a1"), Value::from("b2")]]
    );
    let n = session
        .execute_history(join, &Params::positional([1]), at(330))
        .await
        .unwrap();
    assert_eq!(n, 0);

    let subquery = "SELECT t1.x FROM a t1 WHERE t1.bid IN (SELECT id FROM b WHERE y = 'b1')";
    assert_eq!(
        session.execute_history(subquery, &Params::None, at(30)).await.unwrap(),
        1
    );
    assert_eq!(
        session.execute_history(subquery, &Params::None, at(90)).await.unwrap(),
        0
    );

    let cte = "WITH named_b AS (SELECT id, y FROM b) \
               SELECT a.x, named_b.y FROM a JOIN named_b ON a.bid = named_b.id";
    session.execute_history(cte, &Params::None, at(30)).await.unwrap();
    assert_eq!(
        texts(session.fetchall()),
        vec![vec![Value::from("a1"), Value::from("b1")]]
    );
    session.execute_history(cte, &Params::None, at(90)).await.unwrap();
    assert_eq!(
        texts(session.fetchall()),
        vec![vec![Value::from("a1"), Value::from("b2")]]
    );

    let union = "SELECT x AS v FROM a UNION ALL SELECT y AS v FROM b";
    session.execute_history(union, &Params::None, at(90)).await.unwrap();
    let mut seen = texts(session.fetchall());
    seen.sort_by_key(|row| format!("{:?}", row));
    assert_eq!(seen, vec![vec![Value::from("a1")], vec![Value::from("b2")]]);
    session.execute_history(union, &Params::None, at(150)).await.unwrap();
    assert_eq!(texts(session.fetchall()), vec![vec![Value::from("b2")]]);
}

/// An INSERT behind a WITH clause still versions the rows it generated.
#[tokio::test]
async fn test_insert_behind_with_clause_writes_history() {
    let (mut session, _clock) = setup();
    let n = session
        .execute(
            "WITH src(s) AS (VALUES ('a'), ('b')) \
             INSERT INTO orders (status, amount) SELECT s, 1 FROM src",
            &Params::None,
        )
        .await
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(session.lastrowid(), Some(1));

    let rows = history(&session);
    assert_eq!(rows.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2]);
    assert!(rows.iter().all(|r| r.2 == OPEN));
    assert_history_invariants(&session, "orders_history");
}

/// A multi-row UPDATE versions every matched row and leaves others alone.
#[tokio::test]
async fn test_update_versions_only_matched_rows() {
    let (mut session, clock) = setup();
    for amount in [5, 50, 500] {
        session
            .execute(
                "INSERT INTO orders (status, amount) VALUES ('new', ?)",
                &Params::positional([amount]),
            )
            .await
            .unwrap();
    }
    clock.advance(Duration::seconds(5));
    let n = session
        .execute(
            "UPDATE orders SET status = 'big' WHERE amount > ?",
            &Params::positional([10]),
        )
        .await
        .unwrap();
    assert_eq!(n, 2);

    let rows = history(&session);
    assert_eq!(rows.len(), 5);
    let open: Vec<i64> = rows
        .iter()
        .filter(|r| r.2 == OPEN)
        .map(|r| r.0)
        .collect();
    assert_eq!(open, vec![1, 2, 3]);
    assert_eq!(rows.iter().filter(|r| r.0 == 1).count(), 1);
    assert_history_invariants(&session, "orders_history");
}

/// Backfilling twice inserts nothing the second time.
#[tokio::test]
async fn test_supply_history_data_is_idempotent() {
    let (mut session, _clock) = setup();
    for status in ["a", "b", "c"] {
        session
            .execute_with(
                "INSERT INTO orders (status, amount) VALUES (?, 1)",
                &Params::positional([status]),
                &ExecOptions::without_history(),
            )
            .await
            .unwrap();
    }
    assert!(history(&session).is_empty());

    let first = session
        .supply_history_data("orders", None, Some("backfill"))
        .await
        .unwrap();
    assert_eq!(first.inserted, vec![1, 2, 3]);
    assert!(first.existing.is_empty());

    let second = session
        .supply_history_data("orders", None, None)
        .await
        .unwrap();
    assert!(second.inserted.is_empty());
    assert_eq!(second.existing, vec![1, 2, 3]);

    let subset = session
        .supply_history_data("orders", Some(&[2, 99][..]), None)
        .await
        .unwrap();
    assert!(subset.inserted.is_empty());
    assert_eq!(subset.existing, vec![2]);

    let rows = history(&session);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.3.as_deref() == Some("backfill")));
}

/// executemany packs rows within the parameter limit and versions every id.
#[tokio::test]
async fn test_executemany_chunks_and_records_batches() {
    let config = HistoryConfig::builder()
        .dialect(SqlDialect::Sqlite)
        .max_batch_params(4)
        .build()
        .unwrap();
    let (mut session, _clock) = setup_with(config);

    let rows: Vec<Params> = (1..=5)
        .map(|i| Params::positional([Value::from(format!("s{}", i)), Value::Integer(i)]))
        .collect();
    let n = session
        .executemany("INSERT INTO orders (status, amount) VALUES (?, ?)", &rows)
        .await
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(session.rowcount(), Some(5));

    let batches: Vec<(Option<i64>, u64)> = session
        .insert_batches()
        .iter()
        .map(|b| (b.first_id, b.rows))
        .collect();
    assert_eq!(batches, vec![(Some(1), 2), (Some(3), 2), (Some(5), 1)]);

    let ids: Vec<i64> = history(&session).iter().map(|r| r.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_history_invariants(&session, "orders_history");
}

/// Dict cursors return mappings keyed by column name.
#[tokio::test]
async fn test_dict_cursor_rows() {
    let driver = SqliteDriver::open_in_memory().unwrap();
    driver.connection().unwrap().execute_batch(SCHEMA).unwrap();
    let mut session = SessionFactory::new(config())
        .unwrap()
        .with_cursor_kind(CursorKind::DictCursor)
        .session(driver);
    session
        .execute("INSERT INTO orders (status, amount) VALUES ('x', 3)", &Params::None)
        .await
        .unwrap();

    let row = ops::query_one(&mut session, "SELECT status, amount FROM orders", &Params::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get(0, "amount"), Some(&Value::Integer(3)));
    assert!(matches!(row, FetchedRow::Mapping(_)));
    assert_eq!(session.description(), ["status", "amount"]);
}

/// The blocking facade runs the same protocol from synchronous code.
#[test]
fn test_blocking_session() {
    let driver = SqliteDriver::open_in_memory().unwrap();
    driver.connection().unwrap().execute_batch(SCHEMA).unwrap();
    let mut session = SessionFactory::new(config())
        .unwrap()
        .blocking(driver)
        .unwrap();

    session
        .execute(
            "INSERT INTO orders (status, amount) VALUES (?, ?)",
            &Params::positional([Value::from("new"), Value::Integer(7)]),
        )
        .unwrap();
    assert_eq!(session.lastrowid(), Some(1));
    session
        .execute("DELETE FROM orders", &Params::None)
        .unwrap();

    let changes = session.analysis_process("orders", 1).unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[1].kind, ChangeKind::Delete);
}
