//! Runtime configuration.
//!
//! Values are resolved from CLI flags, then environment variables (a `.env`
//! file is loaded first), then built-in defaults. The resulting [`Config`] is
//! passed explicitly to whatever needs it.

use std::time::Duration;

use crate::application::AppError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:loyalty.db";
pub const DEFAULT_ACCRUAL_ADDRESS: &str = "http://localhost:8081";

/// Reconciliation poller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause between ticks
    pub interval: Duration,
    /// Upper bound for a single authority request
    pub request_timeout: Duration,
    /// Extra attempts after a retriable failure
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_wait: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub accrual_address: String,
    pub poller: PollerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            accrual_address: DEFAULT_ACCRUAL_ADDRESS.to_string(),
            poller: PollerConfig::default(),
        }
    }
}

impl Config {
    /// Build and validate a configuration from already-resolved raw values.
    pub fn new(
        database_url: String,
        accrual_address: String,
        poller: PollerConfig,
    ) -> Result<Self, AppError> {
        let config = Self {
            database_url: database_url.trim().to_string(),
            accrual_address: accrual_address.trim().to_string(),
            poller,
        };
        config.validate()?;
        Ok(config)
    }

    /// Accept bare file paths as well as `sqlite:` URLs.
    pub fn database_url(&self) -> String {
        if self.database_url.starts_with("sqlite:") {
            self.database_url.clone()
        } else {
            format!("sqlite:{}", self.database_url)
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.database_url.is_empty() {
            return Err(AppError::Config(
                "database URI (-d / DATABASE_URI) requires a non-empty value".to_string(),
            ));
        }
        if self.accrual_address.is_empty() {
            return Err(AppError::Config(
                "accrual address (-r / ACCRUAL_SYSTEM_ADDRESS) requires a non-empty value"
                    .to_string(),
            ));
        }
        if !(self.accrual_address.starts_with("http://")
            || self.accrual_address.starts_with("https://"))
        {
            return Err(AppError::Config(format!(
                "accrual address must be an http(s) URL: {}",
                self.accrual_address
            )));
        }
        if self.poller.interval.is_zero() {
            return Err(AppError::Config("poll interval must be positive".to_string()));
        }
        if self.poller.request_timeout.is_zero() {
            return Err(AppError::Config(
                "accrual request timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
