//! Syntactic analysis of DML statements.
//!
//! The analyzers only locate tables, aliases, assigned columns and row
//! predicates. They do not validate the statement beyond that.

pub mod delete;
pub mod insert;
pub mod table_refs;
pub mod update;

pub use delete::{analyze_delete, DeleteForm, DeleteInfo};
pub use insert::{analyze_insert, is_upsert};
pub use table_refs::{alias_map, collect_table_refs, AliasMap, TableRef};
pub use update::{analyze_update, Assignment, UpdateInfo};
