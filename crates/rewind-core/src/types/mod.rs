//! Core value and result types shared by the engine and the drivers.

mod result;
mod value;

pub use result::{ExecOutcome, InsertBatch, ResultSet};
pub use value::{Params, Value};
