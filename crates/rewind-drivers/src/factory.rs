//! Factory for creating database drivers.

use rewind_core::error::{HistoryError, HistoryResult};
use rewind_core::traits::{Driver, DriverConfig, DriverProvider};

/// Factory for creating drivers.
pub struct DriverFactory;

impl DriverFactory {
    /// Create a driver from the given configuration.
    pub async fn create(config: DriverConfig) -> HistoryResult<Box<dyn Driver>> {
        match config.provider {
            #[cfg(feature = "sqlite")]
            DriverProvider::Sqlite => {
                let driver = match config.url.as_deref() {
                    None | Some(":memory:") => crate::sqlite::SqliteDriver::open_in_memory()?,
                    Some(path) => {
                        crate::sqlite::SqliteDriver::open(path.trim_start_matches("sqlite://"))?
                    }
                };
                Ok(Box::new(driver))
            }

            #[cfg(feature = "mysql")]
            DriverProvider::Mysql => {
                let url = config.url.as_deref().ok_or_else(|| {
                    HistoryError::Configuration("MySQL connection URL required".to_string())
                })?;
                let driver = crate::mysql::MySqlDriver::connect(url).await?;
                Ok(Box::new(driver))
            }

            #[allow(unreachable_patterns)]
            provider => Err(HistoryError::Configuration(format!(
                "driver '{:?}' is not enabled in this build",
                provider
            ))),
        }
    }

    /// Create an in-memory SQLite driver.
    #[cfg(feature = "sqlite")]
    pub async fn sqlite_memory() -> HistoryResult<Box<dyn Driver>> {
        Self::create(DriverConfig::default()).await
    }
}
