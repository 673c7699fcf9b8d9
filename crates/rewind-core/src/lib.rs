//! rewind-core - Core library for rewind.
//!
//! This crate keeps a `<table>_history` table next to every tracked table and
//! maintains it from the client side: each INSERT, UPDATE and DELETE issued
//! through a [`HistorySession`] is analyzed, the affected rows are snapshotted
//! and their validity intervals are closed and reopened around the mutation.
//! Read queries can be rewritten to see the data as it was at any instant.
//!
//! # Example
//!
//! ```ignore
//! use rewind_core::{HistoryConfig, Params, SessionFactory};
//!
//! let factory = SessionFactory::new(HistoryConfig::default())?;
//! let mut session = factory.session(driver);
//!
//! session.execute("UPDATE orders SET status = %s WHERE id = %s", &Params::positional(["paid", "7"])).await?;
//!
//! // Orders as they were on new year's day
//! session.execute_history("SELECT * FROM orders o WHERE o.status = 'open'", &Params::None, as_of).await?;
//! let rows = session.fetchall();
//! ```

pub mod analysis;
pub mod blocking;
pub mod config;
pub mod cursor;
pub mod error;
pub mod history;
pub mod ops;
pub mod rewrite;
pub mod sql;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use blocking::BlockingSession;
pub use config::{AmbiguityPolicy, HistoryConfig, SqlDialect};
pub use cursor::{CursorKind, FetchedRow, ResultCursor, ScrollMode};
pub use error::{ErrorCode, HistoryError, HistoryResult};
pub use history::{
    ChangeKind, ChangeRecord, Clock, ExecOptions, FieldChange, HistorySession, ManualClock,
    RollbackMode, RollbackPlan, SessionFactory, SupplyReport, SystemClock,
};
pub use rewrite::{rewrite_history_query, RewrittenQuery};
pub use sql::{Statement, StatementKind};
pub use traits::{Driver, DriverConfig, DriverProvider};
pub use types::{ExecOutcome, InsertBatch, Params, ResultSet, Value};
