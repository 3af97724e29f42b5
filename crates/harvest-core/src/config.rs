use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/harvest.db";
const DEFAULT_SOURCES_PATH: &str = "./config/sources.yaml";
const DEFAULT_USER_AGENT: &str = "harvest/0.1 (multi-source collector)";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from the variables already in the process,
/// without reading `.env`.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let positive_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        match parse_u32(var, default)? {
            0 => Err(invalid(var, "must be greater than 0".to_string())),
            n => Ok(n),
        }
    };

    let positive_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        match parse_u64(var, default)? {
            0 => Err(invalid(var, "must be greater than 0".to_string())),
            n => Ok(n),
        }
    };

    let database_url = or_default("DATABASE_URL", DEFAULT_DATABASE_URL);
    if !database_url.starts_with("sqlite:") {
        return Err(invalid(
            "DATABASE_URL",
            "expected a sqlite: connection string".to_string(),
        ));
    }

    let env = parse_environment(&or_default("HARVEST_ENV", "development"))?;
    let log_level = or_default("HARVEST_LOG_LEVEL", "info");

    let explicit_sources = lookup("HARVEST_SOURCES_PATH").ok();
    let sources_path_explicit = explicit_sources.is_some();
    let sources_path =
        PathBuf::from(explicit_sources.unwrap_or_else(|| DEFAULT_SOURCES_PATH.to_string()));

    let db_max_connections = positive_u32("HARVEST_DB_MAX_CONNECTIONS", "5")?;
    let db_busy_timeout_secs = parse_u64("HARVEST_DB_BUSY_TIMEOUT_SECS", "10")?;
    let http_timeout_secs = positive_u64("HARVEST_HTTP_TIMEOUT_SECS", "30")?;
    let http_user_agent = or_default("HARVEST_HTTP_USER_AGENT", DEFAULT_USER_AGENT);
    let adapter_timeout_secs = positive_u64("HARVEST_ADAPTER_TIMEOUT_SECS", "300")?;
    let max_retries = parse_u32("HARVEST_MAX_RETRIES", "2")?;
    let retry_backoff_base_secs = parse_u64("HARVEST_RETRY_BACKOFF_BASE_SECS", "2")?;
    // 0 disables the early abort.
    let max_consecutive_store_failures =
        parse_u32("HARVEST_MAX_CONSECUTIVE_STORE_FAILURES", "5")?;
    let shutdown_grace_secs = parse_u64("HARVEST_SHUTDOWN_GRACE_SECS", "30")?;

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        sources_path,
        sources_path_explicit,
        db_max_connections,
        db_busy_timeout_secs,
        http_timeout_secs,
        http_user_agent,
        adapter_timeout_secs,
        max_retries,
        retry_backoff_base_secs,
        max_consecutive_store_failures,
        shutdown_grace_secs,
    })
}

fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "HARVEST_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
