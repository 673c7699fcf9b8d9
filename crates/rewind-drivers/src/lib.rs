//! rewind-drivers - Database driver implementations for rewind.
//!
//! # Supported Backends
//!
//! - **SQLite** (feature: `sqlite`, default) - rusqlite, file or in-memory
//! - **MySQL** (feature: `mysql`) - sqlx MySQL connection

mod factory;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "mysql")]
mod mysql;

// Public exports
pub use factory::DriverFactory;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;

// Re-export core types for convenience
pub use rewind_core::traits::{Driver, DriverConfig, DriverProvider};
