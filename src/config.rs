//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::backend::types::PaymentMethod;
use crate::backend::BackendConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub aggregator: AggregatorConfig,
    pub verification: VerificationConfig,
    pub store: StoreConfig,
    pub payments: PaymentConfig,
}

/// Upper bound for `PORTAL_API_MAX_RETRIES`
pub const MAX_API_RETRIES: u32 = 10;

/// Backend API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Applies to GET requests only
    pub max_retries: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Fee aggregation configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub debounce: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
        }
    }
}

/// Verification polling configuration
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Pending responses seen before the flow reports it is taking longer
    pub slow_after_attempts: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 8,
            slow_after_attempts: 3,
        }
    }
}

/// Pending-receipt store backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// JSON file under `StoreConfig::dir`, kept across runs
    File,
    /// Process lifetime only
    Memory,
    Redis,
}

/// Pending-receipt store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub dir: PathBuf,
    pub redis_url: String,
    pub ttl: Duration,
    pub max_entries: usize,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            dir: PathBuf::from(".edupay"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ttl: Duration::from_secs(7 * 24 * 3600),
            max_entries: 50,
            key_prefix: "edupay".to_string(),
        }
    }
}

/// Payment submission configuration
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub payment_method: PaymentMethod,
    pub description: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            payment_method: PaymentMethod::Card,
            description: "School fees payment".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            api: ApiConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            aggregator: AggregatorConfig::from_env()?,
            verification: VerificationConfig::from_env()?,
            store: StoreConfig::from_env()?,
            payments: PaymentConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.logging.validate()?;
        self.verification.validate()?;
        self.store.validate()?;

        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ApiConfig {
            base_url: env::var("PORTAL_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),
            timeout_secs: parse_var("PORTAL_API_TIMEOUT_SECS", "30")?,
            max_retries: parse_var("PORTAL_API_MAX_RETRIES", "0")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PORTAL_API_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PORTAL_API_TIMEOUT_SECS".to_string(),
            ));
        }

        if self.max_retries > MAX_API_RETRIES {
            return Err(ConfigError::InvalidValue(format!(
                "PORTAL_API_MAX_RETRIES cannot exceed {}",
                MAX_API_RETRIES
            )));
        }

        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.base_url.clone(),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AggregatorConfig {
            debounce: Duration::from_millis(parse_var("FEE_DEBOUNCE_MS", "300")?),
        })
    }
}

impl VerificationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(VerificationConfig {
            initial_delay: Duration::from_millis(parse_var("VERIFY_INITIAL_DELAY_MS", "2000")?),
            max_delay: Duration::from_millis(parse_var("VERIFY_MAX_DELAY_MS", "30000")?),
            max_attempts: parse_var("VERIFY_MAX_ATTEMPTS", "8")?,
            slow_after_attempts: parse_var("VERIFY_SLOW_AFTER_ATTEMPTS", "3")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "VERIFY_MAX_ATTEMPTS cannot be 0".to_string(),
            ));
        }

        if self.max_delay < self.initial_delay {
            return Err(ConfigError::ValidationFailed(
                "VERIFY_MAX_DELAY_MS must be >= VERIFY_INITIAL_DELAY_MS".to_string(),
            ));
        }

        Ok(())
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env::var("RECEIPT_STORE")
            .unwrap_or_else(|_| "file".to_string())
            .to_lowercase()
            .as_str()
        {
            "file" => StoreBackend::File,
            "memory" => StoreBackend::Memory,
            "redis" => StoreBackend::Redis,
            _ => return Err(ConfigError::InvalidValue("RECEIPT_STORE".to_string())),
        };

        Ok(StoreConfig {
            backend,
            dir: PathBuf::from(
                env::var("RECEIPT_STORE_DIR").unwrap_or_else(|_| ".edupay".to_string()),
            ),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            ttl: Duration::from_secs(parse_var("RECEIPT_TTL_SECS", "604800")?),
            max_entries: parse_var("RECEIPT_MAX_ENTRIES", "50")?,
            key_prefix: env::var("RECEIPT_KEY_PREFIX").unwrap_or_else(|_| "edupay".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue(
                "RECEIPT_MAX_ENTRIES cannot be 0".to_string(),
            ));
        }

        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue("RECEIPT_TTL_SECS".to_string()));
        }

        if self.backend == StoreBackend::File && self.dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "RECEIPT_STORE_DIR cannot be empty".to_string(),
            ));
        }

        if self.backend == StoreBackend::Redis
            && !self.redis_url.starts_with("redis://")
            && !self.redis_url.starts_with("rediss://")
        {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let payment_method = match env::var("PAYMENT_METHOD") {
            Ok(raw) => PaymentMethod::from_str(&raw)
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_METHOD".to_string()))?,
            Err(_) => PaymentMethod::Card,
        };

        Ok(PaymentConfig {
            payment_method,
            description: env::var("PAYMENT_DESCRIPTION")
                .unwrap_or_else(|_| "School fees payment".to_string()),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
