//! rewind command line interface.
//!
//! # Configuration
//!
//! - `REWIND_DATABASE_URL` - database when `--database` is not given
//! - `REWIND_*` - history settings, see `HistoryConfig::from_env`
//! - `~/.config/rewind/config.toml` - read when present and `--config` is not given
//!
//! A `.env` file in the working directory is loaded first.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rewind_core::history::parse_timestamp;
use rewind_core::{
    ops, Driver, DriverConfig, DriverProvider, ExecOptions, HistoryConfig, HistorySession, Params,
    SessionFactory, SqlDialect, Statement, Value,
};
use rewind_drivers::DriverFactory;

mod args;

use args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let driver_config = cli.database.as_deref().map(driver_config);
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(driver) = &driver_config {
        config.dialect = match driver.provider {
            DriverProvider::Sqlite => SqlDialect::Sqlite,
            DriverProvider::Mysql => SqlDialect::MySql,
        };
    }
    if let Some(user) = &cli.user {
        config.operate_user = Some(user.clone());
    }
    let factory = SessionFactory::new(config)?.with_cursor_kind(cli.cursor);

    if let Command::Rewrite { at, sql } = &cli.command {
        let stmt = Statement::parse(sql, factory.config().dialect)?;
        let at = parse_timestamp(at)?;
        let rewritten = rewind_core::rewrite_history_query(
            &stmt,
            &rewind_core::history::format_timestamp(at),
            factory.config(),
        )?;
        println!("{}", rewritten.sql);
        return Ok(());
    }

    let driver_config = driver_config
        .context("no database given; pass --database or set REWIND_DATABASE_URL")?;
    let driver = DriverFactory::create(driver_config).await?;
    let mut session = factory.session(driver);
    let result = run(&mut session, cli.command).await;
    session.close().await?;
    let output = result?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(
    session: &mut HistorySession<Box<dyn Driver>>,
    command: Command,
) -> Result<serde_json::Value> {
    let output = match command {
        Command::Exec {
            sql,
            params,
            no_history,
        } => {
            let options = if no_history {
                ExecOptions::without_history()
            } else {
                ExecOptions::default()
            };
            let (lastrowid, count) =
                ops::operate(session, &sql, &to_params(&params), true, &options).await?;
            json!({
                "rowcount": session.rowcount().unwrap_or(count),
                "lastrowid": lastrowid,
                "rows": session.fetchall(),
            })
        }
        Command::AsOf { at, sql, params } => {
            let at = parse_timestamp(&at)?;
            session.execute_history(&sql, &to_params(&params), at).await?;
            json!(session.fetchall())
        }
        Command::Backfill { table, ids } => {
            let ids = (!ids.is_empty()).then_some(ids.as_slice());
            let report = session.supply_history_data(&table, ids, None).await?;
            session.commit().await?;
            json!(report)
        }
        Command::Changes { table, id } => json!(session.analysis_process(&table, id).await?),
        Command::Rollback {
            table,
            history_id,
            apply,
        } => {
            let plan = session.rollback(&table, history_id).await?;
            if apply {
                let user = session.config().operate_user.clone();
                let count =
                    ops::rollback_history_data(session, &table, history_id, user.as_deref())
                        .await?;
                json!({ "plan": plan, "rowcount": count })
            } else {
                json!(plan)
            }
        }
        Command::Rewrite { at, sql } => {
            json!(session.history_query(&sql, parse_timestamp(&at)?)?)
        }
    };
    Ok(output)
}

fn driver_config(database: &str) -> DriverConfig {
    if database.starts_with("mysql://") {
        DriverConfig::mysql(database)
    } else {
        DriverConfig::sqlite(database)
    }
}

fn load_config(path: Option<&Path>) -> Result<HistoryConfig> {
    if let Some(path) = path {
        return HistoryConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()));
    }
    let default_path: Option<PathBuf> =
        dirs::config_dir().map(|dir| dir.join("rewind").join("config.toml"));
    match default_path {
        Some(path) if path.exists() => Ok(HistoryConfig::from_file(&path)?),
        _ => Ok(HistoryConfig::from_env()?),
    }
}

/// Type a command-line argument: integers, decimals and `null`, else text.
fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else {
        Value::from(raw)
    }
}

fn to_params(raw: &[String]) -> Params {
    if raw.is_empty() {
        Params::None
    } else {
        Params::positional(raw.iter().map(|r| parse_param(r)))
    }
}
