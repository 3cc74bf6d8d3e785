use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "storefront_development_only_signing_key_rotate_before_any_real_deployment_2024";

/// Runtime settings, layered from built-in defaults, `config/*.toml` and
/// `APP__*` environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// `sqlite://…` or `postgres://…`
    pub database_url: String,

    /// HS256 key for access tokens, at least 64 characters
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Token lifetime in seconds
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: u64,

    #[serde(default = "defaults::auth_issuer")]
    pub auth_issuer: String,

    #[serde(default = "defaults::auth_audience")]
    pub auth_audience: String,

    pub host: String,

    #[serde(default = "defaults::port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// `development`, `staging`, `production`, ...
    pub environment: String,

    #[serde(default = "defaults::log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Apply pending migrations before serving
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma-separated origins accepted by CORS
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Opt into permissive CORS outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default = "defaults::db_max_connections")]
    #[validate(range(min = 1, max = 1000))]
    pub db_max_connections: u32,

    #[serde(default = "defaults::db_min_connections")]
    pub db_min_connections: u32,

    /// Pool timeouts, in seconds
    #[serde(default = "defaults::db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "defaults::db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "defaults::db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Whole-request deadline in seconds
    #[serde(default = "defaults::request_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    #[serde(default = "defaults::api_page_size")]
    #[validate(range(min = 1, max = 1000))]
    pub api_default_page_size: u64,

    /// Upper bound on `per_page`
    #[serde(default = "defaults::api_max_page_size")]
    #[validate(range(min = 1, max = 1000))]
    pub api_max_page_size: u64,

    /// Fresh order numbers tried per placement before giving up
    #[serde(default = "defaults::order_number_max_attempts")]
    #[validate(range(min = 1, max = 20))]
    pub order_number_max_attempts: u32,
}

impl AppConfig {
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: u64,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            auth_issuer: defaults::auth_issuer(),
            auth_audience: defaults::auth_audience(),
            host,
            port,
            environment,
            log_level: defaults::log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: defaults::db_max_connections(),
            db_min_connections: defaults::db_min_connections(),
            db_connect_timeout_secs: defaults::db_connect_timeout_secs(),
            db_idle_timeout_secs: defaults::db_idle_timeout_secs(),
            db_acquire_timeout_secs: defaults::db_acquire_timeout_secs(),
            request_timeout_secs: defaults::request_timeout_secs(),
            api_default_page_size: defaults::api_page_size(),
            api_max_page_size: defaults::api_max_page_size(),
            order_number_max_attempts: defaults::order_number_max_attempts(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Rules spanning several fields, checked after the per-field ones.
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            errors.add(
                "cors_allowed_origins",
                rule_error(
                    "cors_origins_missing",
                    "outside development either list origins in APP__CORS_ALLOWED_ORIGINS or set APP__CORS_ALLOW_ANY_ORIGIN=true",
                ),
            );
        }
        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            errors.add(
                "jwt_secret",
                rule_error(
                    "jwt_secret_is_dev_default",
                    "the built-in development signing key is refused here; set APP__JWT_SECRET",
                ),
            );
        }
        if self.api_default_page_size > self.api_max_page_size {
            errors.add(
                "api_default_page_size",
                rule_error("page_size_order", "default page size is above the maximum"),
            );
        }
        if self.db_min_connections > self.db_max_connections {
            errors.add(
                "db_min_connections",
                rule_error("pool_size_order", "minimum pool size is above the maximum"),
            );
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn rule_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Fallbacks for settings left out of every source.
mod defaults {
    use super::{DEFAULT_LOG_LEVEL, DEFAULT_PORT};

    pub fn log_level() -> String {
        DEFAULT_LOG_LEVEL.to_string()
    }

    pub fn port() -> u16 {
        DEFAULT_PORT
    }

    pub fn auth_issuer() -> String {
        "storefront-api".to_string()
    }

    pub fn auth_audience() -> String {
        "storefront-clients".to_string()
    }

    pub fn db_max_connections() -> u32 {
        16
    }

    pub fn db_min_connections() -> u32 {
        1
    }

    pub fn db_connect_timeout_secs() -> u64 {
        30
    }

    pub fn db_idle_timeout_secs() -> u64 {
        600
    }

    pub fn db_acquire_timeout_secs() -> u64 {
        8
    }

    pub fn request_timeout_secs() -> u64 {
        30
    }

    pub fn api_page_size() -> u64 {
        20
    }

    pub fn api_max_page_size() -> u64 {
        100
    }

    pub fn order_number_max_attempts() -> u32 {
        5
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(rule_error("log_level", "expected trace, debug, info, warn or error"))
    }
}

/// Length, variety and a deny-list of placeholder fragments.
fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let secret = secret.trim();
    if secret.len() < 64 {
        return Err(rule_error("jwt_secret", "must be at least 64 characters"));
    }

    let distinct: std::collections::HashSet<char> = secret.chars().collect();
    if distinct.len() < 10 {
        return Err(rule_error(
            "jwt_secret",
            "must contain at least 10 distinct characters",
        ));
    }

    let lower = secret.to_ascii_lowercase();
    if ["changeme", "password", "your-secret-key", "12345"]
        .iter()
        .any(|fragment| lower.contains(fragment))
    {
        return Err(rule_error(
            "jwt_secret",
            "looks like a placeholder; generate a random key",
        ));
    }

    Ok(())
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let builder = fmt().with_env_filter(EnvFilter::new(filter_directive));
    // try_init: a subscriber may already be installed (tests, embedding).
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Builds and validates the configuration for the profile named by
/// `RUN_ENV` (or `APP_ENV`), defaulting to development.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let profile = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    let is_dev_profile = profile.eq_ignore_ascii_case(DEFAULT_ENV);
    info!(%profile, "loading configuration");

    if !Path::new(CONFIG_DIR).is_dir() {
        info!(dir = CONFIG_DIR, "no config directory; using defaults and APP__* variables");
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", profile.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?;
    if is_dev_profile {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let layered = builder
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{profile}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if layered.get_string("jwt_secret").is_err() {
        error!(%profile, "no signing key configured; set APP__JWT_SECRET");
        return Err(ConfigError::NotFound("jwt_secret".into()).into());
    }

    let app_config: AppConfig = layered.try_deserialize()?;
    app_config
        .validate()
        .and_then(|_| app_config.validate_additional_constraints())
        .map_err(|errors| {
            error!(%errors, "configuration rejected");
            AppConfigError::Validation(errors)
        })?;

    info!(environment = %app_config.environment, port = app_config.port, "configuration loaded");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_SECRET: &str =
        "k3Jx9QpL2vTz8RmW5nYb7HcFd4GsAe6UoXiPq1ZwVtNrMyLkJhBgCfDeSaQwErTy";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            STRONG_SECRET.into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn strong_config_passes_field_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_or_weak_jwt_secret_is_rejected() {
        assert!(validate_jwt_secret("short").is_err());
        assert!(validate_jwt_secret(&"a".repeat(80)).is_err());
        assert!(validate_jwt_secret(&format!("password{}", STRONG_SECRET)).is_err());
        assert!(validate_jwt_secret(STRONG_SECRET).is_ok());
    }

    #[test]
    fn development_secret_is_itself_well_formed() {
        assert!(validate_jwt_secret(DEV_DEFAULT_JWT_SECRET).is_ok());
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secret_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn page_size_bounds_are_cross_checked() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.api_default_page_size = 500;
        cfg.api_max_page_size = 50;
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn log_level_must_be_known() {
        assert!(validate_log_level("DEBUG").is_ok());
        assert!(validate_log_level("verbose").is_err());
    }
}
