//! Error types for rewind operations.
//!
//! Every failure carries a stable [`ErrorCode`] so callers can branch on the
//! kind of problem without matching on message text.

use thiserror::Error;

/// Result type alias for rewind operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Main error type for all rewind operations.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// The text could not be tokenized as a single SQL statement.
    #[error("Unrecognized statement: {message}")]
    UnrecognizedStatement { message: String },

    /// A table, alias or predicate required for history tracking could not be located.
    #[error("Analysis error: {message}")]
    Analysis { message: String, code: ErrorCode },

    /// The operating user is not acceptable as a history column value.
    #[error("Invalid operate user: {message}")]
    InvalidOperateUser { message: String },

    /// Rollback was requested for the row's most recent history entry.
    #[error("History row {history_id} of table '{table}' is already the current state")]
    RollbackTargetIsCurrent { table: String, history_id: i64 },

    /// Rollback was requested for a history row that does not exist.
    #[error("History row {history_id} not found in table '{table}'")]
    RollbackTargetMissing { table: String, history_id: i64 },

    /// No history rows exist for a logical row.
    #[error("No history recorded for id {base_id} of table '{table}'")]
    HistoryNotFound { table: String, base_id: i64 },

    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        suggestion: Option<String>,
    },

    /// The requested operation is not available for this cursor or driver.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The underlying database driver failed.
    #[error("Driver error: {message}")]
    Driver {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Statement (SQL_xxx)
    SqlUnrecognized,
    SqlUnsupportedShape,

    // Analysis (ANA_xxx)
    AnaTableNotFound,
    AnaAliasUnbound,
    AnaAmbiguousColumn,
    AnaUnknownColumn,

    // History (HIS_xxx)
    HisInvalidUser,
    HisRollbackCurrent,
    HisRollbackMissing,
    HisNotFound,

    // Validation (VAL_xxx)
    ValInvalidInput,
    ValMissingParameter,
    ValUnusedParameter,

    // Driver (DRV_xxx)
    DrvConnectionFailed,
    DrvOperationFailed,

    // Configuration
    CfgInvalid,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SqlUnrecognized => "SQL_001",
            ErrorCode::SqlUnsupportedShape => "SQL_002",
            ErrorCode::AnaTableNotFound => "ANA_001",
            ErrorCode::AnaAliasUnbound => "ANA_002",
            ErrorCode::AnaAmbiguousColumn => "ANA_003",
            ErrorCode::AnaUnknownColumn => "ANA_004",
            ErrorCode::HisInvalidUser => "HIS_001",
            ErrorCode::HisRollbackCurrent => "HIS_002",
            ErrorCode::HisRollbackMissing => "HIS_003",
            ErrorCode::HisNotFound => "HIS_004",
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValMissingParameter => "VAL_002",
            ErrorCode::ValUnusedParameter => "VAL_003",
            ErrorCode::DrvConnectionFailed => "DRV_001",
            ErrorCode::DrvOperationFailed => "DRV_002",
            ErrorCode::CfgInvalid => "CFG_001",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl HistoryError {
    /// Create an unrecognized-statement error.
    pub fn unrecognized(message: impl Into<String>) -> Self {
        Self::UnrecognizedStatement {
            message: message.into(),
        }
    }

    /// Create an analysis error.
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis {
            message: message.into(),
            code: ErrorCode::AnaTableNotFound,
        }
    }

    /// Create an analysis error with a specific code.
    pub fn analysis_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::Analysis {
            message: message.into(),
            code,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            suggestion: None,
        }
    }

    /// Create a validation error for an unbound placeholder.
    pub fn missing_parameter(placeholder: impl std::fmt::Display) -> Self {
        Self::Validation {
            message: format!("No argument supplied for placeholder {}", placeholder),
            code: ErrorCode::ValMissingParameter,
            suggestion: Some("Pass one argument per placeholder, in the placeholder style used by the statement".to_string()),
        }
    }

    /// Create a validation error for arguments left over after binding.
    pub fn unused_parameters(used: usize, given: usize) -> Self {
        Self::Validation {
            message: format!("Statement consumes {} arguments but {} were supplied", used, given),
            code: ErrorCode::ValUnusedParameter,
            suggestion: None,
        }
    }

    /// Create an invalid operate user error.
    pub fn invalid_operate_user(message: impl Into<String>) -> Self {
        Self::InvalidOperateUser {
            message: message.into(),
        }
    }

    /// Create a driver error.
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            code: ErrorCode::DrvOperationFailed,
            source: None,
        }
    }

    /// Create a driver error that keeps the underlying error as its source.
    pub fn driver_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Driver {
            message: message.into(),
            code: ErrorCode::DrvOperationFailed,
            source: Some(Box::new(source)),
        }
    }

    /// True when the error only means "this text is not something we can analyze".
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Self::UnrecognizedStatement { .. })
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnrecognizedStatement { .. } => ErrorCode::SqlUnrecognized,
            Self::Analysis { code, .. } => *code,
            Self::InvalidOperateUser { .. } => ErrorCode::HisInvalidUser,
            Self::RollbackTargetIsCurrent { .. } => ErrorCode::HisRollbackCurrent,
            Self::RollbackTargetMissing { .. } => ErrorCode::HisRollbackMissing,
            Self::HistoryNotFound { .. } => ErrorCode::HisNotFound,
            Self::Validation { code, .. } => *code,
            Self::NotSupported(_) => ErrorCode::SqlUnsupportedShape,
            Self::Configuration(_) => ErrorCode::CfgInvalid,
            Self::Driver { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Analysis {
                code: ErrorCode::AnaAmbiguousColumn,
                ..
            } => Some("Qualify the column with its table alias"),
            Self::Analysis { .. } => Some("Check that every referenced table and alias is spelled as in the FROM clause"),
            Self::InvalidOperateUser { .. } => Some("Use a printable user name within the configured length"),
            Self::RollbackTargetIsCurrent { .. } => Some("Pick an earlier history row; the latest one already matches the live row"),
            Self::Validation { suggestion, .. } => suggestion.as_deref(),
            Self::Driver { .. } => Some("Roll back the enclosing transaction before retrying"),
            _ => None,
        }
    }
}
