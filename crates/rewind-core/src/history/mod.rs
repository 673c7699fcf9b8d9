//! History table maintenance: SQL builders, change classification, batching
//! and the session that runs the protocol.

pub mod batch;
pub mod changes;
pub mod clock;
mod session;
pub mod statements;

pub use batch::{reconstruct_ids, InsertValues, PackedInsert};
pub use changes::{classify_history, compare_difference, ChangeKind, ChangeRecord, FieldChange};
pub use clock::{format_timestamp, parse_timestamp, Clock, ManualClock, SystemClock};
pub use session::{
    ExecOptions, HistorySession, RollbackMode, RollbackPlan, SessionFactory, SupplyReport,
};
pub use statements::HistoryLayout;
