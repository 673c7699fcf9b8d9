use clap::{Parser, Subcommand};
use rewind_core::CursorKind;
use std::path::PathBuf;

/// rewind - client-side history tables
#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(version)]
#[command(about = "Maintain and query client-side history tables", long_about = None)]
pub struct Cli {
    /// Database: a SQLite file, `:memory:`, or a `mysql://` URL
    #[arg(short = 'd', long = "database", env = "REWIND_DATABASE_URL")]
    pub database: Option<String>,

    /// Configuration file (.toml, .json, .yaml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Operating user recorded in history rows
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// Row shape of query output: Cursor (tuples) or DictCursor (mappings)
    #[arg(long = "cursor", default_value = "DictCursor")]
    pub cursor: CursorKind,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute one statement, writing history for INSERT, UPDATE and DELETE
    Exec {
        sql: String,

        /// Positional argument (repeatable); integers, decimals and `null` are typed
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Execute without writing history
        #[arg(long = "no-history")]
        no_history: bool,
    },

    /// Run a read query against history as of an instant
    AsOf {
        /// Instant, e.g. `2024-01-01 12:00:00`
        #[arg(long = "at")]
        at: String,

        sql: String,

        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },

    /// Print the point-in-time form of a read query without running it
    Rewrite {
        #[arg(long = "at")]
        at: String,

        sql: String,
    },

    /// Give rows without history an open history row
    Backfill {
        table: String,

        /// Restrict to these ids (repeatable)
        #[arg(long = "id")]
        ids: Vec<i64>,
    },

    /// Show the change history of one row
    Changes { table: String, id: i64 },

    /// Restore a row to the state of one history row
    Rollback {
        table: String,

        history_id: i64,

        /// Execute the restore instead of printing it
        #[arg(long = "apply")]
        apply: bool,
    },
}
