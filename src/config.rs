use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_ORDER_PREFIX: &str = "ORD";
const DEFAULT_ORDER_SUFFIX_LENGTH: usize = 8;
const DEFAULT_ORDER_NUMBER_ATTEMPTS: u32 = 5;
const DEFAULT_PROVIDER_BASE_URL: &str = "https://wa.me";
const DEFAULT_CURRENCY_SYMBOL: &str = "$";
const DEFAULT_MAX_MESSAGE_CHARS: usize = 3500;

/// Order number allocation settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OrdersConfig {
    /// Fixed prefix of every order number
    #[serde(default = "default_order_prefix")]
    #[validate(length(min = 1, max = 8), custom = "validate_order_prefix")]
    pub number_prefix: String,

    /// Embed the current year between prefix and suffix
    #[serde(default = "default_true_bool")]
    pub include_year: bool,

    /// Length of the random suffix
    #[serde(default = "default_order_suffix_length")]
    #[validate(range(min = 6, max = 16))]
    pub suffix_length: usize,

    /// Attempts before giving up on finding an unused number
    #[serde(default = "default_order_number_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub max_generation_attempts: u32,

    /// Allow completed or cancelled orders to move to another status
    #[serde(default = "default_true_bool")]
    pub allow_terminal_transitions: bool,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            number_prefix: default_order_prefix(),
            include_year: true,
            suffix_length: default_order_suffix_length(),
            max_generation_attempts: default_order_number_attempts(),
            allow_terminal_transitions: true,
        }
    }
}

/// Fulfillment message and deep link settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MessagingConfig {
    /// Base URL of the messaging provider's click-to-chat endpoint
    #[serde(default = "default_provider_base_url")]
    #[validate(url)]
    pub provider_base_url: String,

    /// Destination channel (international phone number, digits only)
    #[validate(custom = "validate_channel_id")]
    pub channel_id: String,

    /// Storefront base URL used to build product permalinks
    #[serde(default)]
    #[validate(url)]
    pub store_base_url: Option<String>,

    #[serde(default = "default_currency_symbol")]
    #[validate(length(min = 1, max = 4))]
    pub currency_symbol: String,

    /// Upper bound for the rendered message, in characters
    #[serde(default = "default_max_message_chars")]
    #[validate(range(min = 200, max = 65536))]
    pub max_message_chars: usize,
}

impl MessagingConfig {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            provider_base_url: default_provider_base_url(),
            channel_id: channel_id.into(),
            store_base_url: None,
            currency_symbol: default_currency_symbol(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds (5min - 24h)
    #[serde(default = "default_jwt_expiration")]
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// Server host address
    pub host: String,

    /// Server port (1024-65535)
    #[serde(default = "default_port")]
    #[validate(range(min = 1024))]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    #[serde(default = "default_api_max_page_size")]
    #[validate(range(min = 1, max = 500))]
    pub api_max_page_size: u64,

    #[serde(default)]
    #[validate]
    pub orders: OrdersConfig,

    #[validate]
    pub messaging: MessagingConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything not passed in
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
        messaging: MessagingConfig,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: default_jwt_expiration(),
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            orders: OrdersConfig::default(),
            messaging,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Parsed CORS origins, empty when none are configured
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> usize {
    3600
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_auth_issuer() -> String {
    "storefront-orders".to_string()
}

fn default_auth_audience() -> String {
    "storefront".to_string()
}

fn default_order_prefix() -> String {
    DEFAULT_ORDER_PREFIX.to_string()
}

fn default_order_suffix_length() -> usize {
    DEFAULT_ORDER_SUFFIX_LENGTH
}

fn default_order_number_attempts() -> u32 {
    DEFAULT_ORDER_NUMBER_ATTEMPTS
}

fn default_provider_base_url() -> String {
    DEFAULT_PROVIDER_BASE_URL.to_string()
}

fn default_currency_symbol() -> String {
    DEFAULT_CURRENCY_SYMBOL.to_string()
}

fn default_max_message_chars() -> usize {
    DEFAULT_MAX_MESSAGE_CHARS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

fn validate_order_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("number_prefix");
        err.message = Some("Order number prefix must be uppercase ASCII letters or digits".into());
        Err(err)
    }
}

fn validate_channel_id(channel: &str) -> Result<(), ValidationError> {
    let digits = channel.len();
    if (6..=15).contains(&digits) && channel.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("channel_id");
        err.message =
            Some("Channel id must be an international phone number of 6-15 digits".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_orders={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret and messaging.channel_id have no defaults.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for required in ["jwt_secret", "messaging.channel_id"] {
        if config.get_string(required).is_err() {
            error!(
                key = required,
                "Required configuration key is missing; set it in config/ or via APP__ environment variables"
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(
                required.to_string(),
            )));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
