//! Configuration system for rewind.
//!
//! A [`HistoryConfig`] is built once (from a file, the environment or the
//! builder) and shared by every session a [`crate::SessionFactory`] creates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{HistoryError, HistoryResult};

/// SQL dialect used when tokenizing statements.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SqlDialect {
    /// Backtick identifiers, `#` comments, backslash escapes.
    #[default]
    MySql,
    /// Double-quote, backtick and bracket identifiers.
    Sqlite,
    /// Permissive ANSI-ish tokenizer.
    Generic,
}

/// How unqualified SET columns are matched to tables in a multi-table UPDATE.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AmbiguityPolicy {
    /// Every table whose schema has the column is treated as affected.
    #[default]
    AffectAllMatching,
    /// A column present in more than one table is an error.
    Reject,
}

/// History tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Suffix appended to a tracked table's name to get its history table.
    pub suffix: String,
    /// Primary key column of tracked tables (and of history tables).
    pub primary_key: String,
    /// Columns copied unversioned into `base_<name>`; must include the primary key.
    pub scope_columns: Vec<String>,
    /// Whether mutations write history unless a call says otherwise.
    pub enabled: bool,
    /// Default operating user recorded in `record_operate_user`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operate_user: Option<String>,
    /// End time marking an open interval.
    pub open_interval_end: String,
    /// Tokenizer dialect.
    pub dialect: SqlDialect,
    /// Resolution of unqualified columns in multi-table updates.
    pub ambiguity: AmbiguityPolicy,
    /// Upper bound on the rendered length of one batched INSERT.
    pub max_statement_length: usize,
    /// Upper bound on bound parameters in one batched INSERT.
    pub max_batch_params: usize,
    /// Longest accepted operating user.
    pub max_operate_user_len: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            suffix: "_history".to_string(),
            primary_key: "id".to_string(),
            scope_columns: vec!["id".to_string()],
            enabled: true,
            operate_user: None,
            open_interval_end: "9999-12-31 23:59:59".to_string(),
            dialect: SqlDialect::MySql,
            ambiguity: AmbiguityPolicy::AffectAllMatching,
            max_statement_length: 1_024_000,
            max_batch_params: 32_766,
            max_operate_user_len: 255,
        }
    }
}

impl HistoryConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> HistoryResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| HistoryError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| HistoryError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| HistoryError::Configuration(e.to_string()))?,
            _ => {
                return Err(HistoryError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> HistoryResult<Self> {
        let mut config = Self::default();

        if let Ok(suffix) = std::env::var("REWIND_SUFFIX") {
            config.suffix = suffix;
        }
        if let Ok(pk) = std::env::var("REWIND_PRIMARY_KEY") {
            config.primary_key = pk;
        }
        if let Ok(columns) = std::env::var("REWIND_SCOPE_COLUMNS") {
            config.scope_columns = columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(enabled) = std::env::var("REWIND_ENABLED") {
            config.enabled = !matches!(
                enabled.to_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        if let Ok(user) = std::env::var("REWIND_OPERATE_USER") {
            config.operate_user = Some(user).filter(|u| !u.is_empty());
        }
        if let Ok(dialect) = std::env::var("REWIND_DIALECT") {
            config.dialect = dialect
                .parse()
                .map_err(|_| HistoryError::Configuration(format!("Unknown dialect '{}'", dialect)))?;
        }
        if let Ok(len) = std::env::var("REWIND_MAX_STATEMENT_LENGTH") {
            config.max_statement_length = len.parse().map_err(|_| {
                HistoryError::Configuration(
                    "REWIND_MAX_STATEMENT_LENGTH must be a positive integer".to_string(),
                )
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> HistoryConfigBuilder {
        HistoryConfigBuilder::default()
    }

    /// Check the invariants the history protocol relies on.
    pub fn validate(&self) -> HistoryResult<()> {
        if self.suffix.is_empty() {
            return Err(HistoryError::Configuration(
                "History table suffix must not be empty".to_string(),
            ));
        }
        if !self.is_scope_column(&self.primary_key) {
            return Err(HistoryError::Configuration(format!(
                "Scope columns must include the primary key '{}'",
                self.primary_key
            )));
        }
        if self.max_statement_length == 0 || self.max_batch_params == 0 {
            return Err(HistoryError::Configuration(
                "Batch limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the history table mirroring `table`.
    pub fn history_table(&self, table: &str) -> String {
        format!("{}{}", table, self.suffix)
    }

    /// Whether `column` is copied into a `base_` column.
    pub fn is_scope_column(&self, column: &str) -> bool {
        self.scope_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// History-table column mirroring the scope column `column`.
    pub fn base_column(&self, column: &str) -> String {
        format!("base_{}", column)
    }
}

/// Builder for HistoryConfig.
#[derive(Default)]
pub struct HistoryConfigBuilder {
    config: HistoryConfig,
}

impl HistoryConfigBuilder {
    /// Set the history table suffix.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.suffix = suffix.into();
        self
    }

    /// Set the primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.config.primary_key = column.into();
        self
    }

    /// Set the scope columns.
    pub fn scope_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.scope_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable history tracking by default.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Set the default operating user.
    pub fn operate_user(mut self, user: impl Into<String>) -> Self {
        self.config.operate_user = Some(user.into());
        self
    }

    /// Set the open interval sentinel.
    pub fn open_interval_end(mut self, end: impl Into<String>) -> Self {
        self.config.open_interval_end = end.into();
        self
    }

    /// Set the tokenizer dialect.
    pub fn dialect(mut self, dialect: SqlDialect) -> Self {
        self.config.dialect = dialect;
        self
    }

    /// Set the ambiguity policy for multi-table updates.
    pub fn ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.config.ambiguity = policy;
        self
    }

    /// Set the maximum batched statement length.
    pub fn max_statement_length(mut self, len: usize) -> Self {
        self.config.max_statement_length = len;
        self
    }

    /// Set the maximum number of parameters in one batched statement.
    pub fn max_batch_params(mut self, count: usize) -> Self {
        self.config.max_batch_params = count;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> HistoryResult<HistoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
