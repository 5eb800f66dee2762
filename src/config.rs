//! Configuration loader for the `pv-sentinel` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
//! The alert retention horizon is deliberately absent: it is a fixed policy
//! (see `pipeline::retention`), not a tunable.
use std::{env, time::Duration};

use anyhow::{anyhow, Result};

/// Parse an optional numeric variable with a default value.
macro_rules! parse_env_num {
    ($get:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $get($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional numeric variable without a default.
macro_rules! parse_env_opt {
    ($get:expr, $var_name:expr, $ty:ty) => {
        $get($var_name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
    };
}

/// Parse a required string variable.
macro_rules! require_env {
    ($get:expr, $var_name:expr) => {
        $get($var_name).ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Port the trigger API listens on.
    pub http_port: u16,

    /// Seconds between scheduled alert runs.
    pub alert_interval_secs: u64,

    /// Upstream inverter report export (CSV). Report runs are disabled when unset.
    pub report_url: Option<String>,

    /// Plant id injected into report rows without one.
    pub report_plant_id: Option<i64>,

    /// Zero-based line of the header row inside the report export.
    pub report_header_row: usize,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `HTTP_PORT` – listen port (default: 8080)
/// - `ALERT_INTERVAL_SECS` – alert schedule interval (default: 900)
/// - `REPORT_URL`, `REPORT_PLANT_ID`, `REPORT_HEADER_ROW` (default: 1)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_with(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_with(get: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let db_url = require_env!(get, "DATABASE_URL");
    let db_pool_max = parse_env_num!(get, "DB_POOL_MAX", u32, 5);
    let http_port = parse_env_num!(get, "HTTP_PORT", u16, 8080);
    let alert_interval_secs = parse_env_num!(get, "ALERT_INTERVAL_SECS", u64, 900);
    let report_url = get("REPORT_URL").filter(|v| !v.trim().is_empty());
    let report_plant_id = parse_env_opt!(get, "REPORT_PLANT_ID", i64);
    let report_header_row = parse_env_num!(get, "REPORT_HEADER_ROW", usize, 1);

    if alert_interval_secs == 0 {
        return Err(anyhow!("Invalid ALERT_INTERVAL_SECS: must be positive"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        http_port,
        alert_interval_secs,
        report_url,
        report_plant_id,
        report_header_row,
    })
}

impl Config {
    // ---
    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_interval_secs)
    }

    /// Database URL with the password replaced by `****`.
    pub fn masked_db_url(&self) -> String {
        // ---
        if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                // No password when the colon belongs to the scheme
                if !self.db_url[colon_pos + 1..].starts_with("//") && colon_pos + 1 < at_pos {
                    return format!("{}:****{}", &self.db_url[..colon_pos], &self.db_url[at_pos..]);
                }
            }
        }
        self.db_url.clone()
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL        : {}", self.masked_db_url());
        tracing::info!("  DB_POOL_MAX         : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT           : {}", self.http_port);
        tracing::info!("  ALERT_INTERVAL_SECS : {}", self.alert_interval_secs);
        tracing::info!(
            "  REPORT_URL          : {}",
            self.report_url.as_deref().unwrap_or("<disabled>")
        );
        tracing::info!("  REPORT_PLANT_ID     : {:?}", self.report_plant_id);
        tracing::info!("  REPORT_HEADER_ROW   : {}", self.report_header_row);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_with(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        // ---
        let cfg = load(&[("DATABASE_URL", "postgres://pv:secret@db:5432/pv")]).unwrap();
        assert_eq!(cfg.db_pool_max, 5);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.alert_interval(), Duration::from_secs(900));
        assert_eq!(cfg.report_url, None);
        assert_eq!(cfg.report_header_row, 1);
    }

    #[test]
    fn test_missing_database_url_fails() {
        // ---
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_invalid_numbers_fail() {
        // ---
        let err = load(&[("DATABASE_URL", "postgres://db/pv"), ("DB_POOL_MAX", "many")])
            .unwrap_err();
        assert!(err.to_string().contains("DB_POOL_MAX"));

        let zero = load(&[("DATABASE_URL", "postgres://db/pv"), ("ALERT_INTERVAL_SECS", "0")]);
        assert!(zero.is_err());
    }

    #[test]
    fn test_report_settings() {
        // ---
        let cfg = load(&[
            ("DATABASE_URL", "postgres://db/pv"),
            ("REPORT_URL", "http://portal/export.csv"),
            ("REPORT_PLANT_ID", "12"),
            ("REPORT_HEADER_ROW", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.report_url.as_deref(), Some("http://portal/export.csv"));
        assert_eq!(cfg.report_plant_id, Some(12));
        assert_eq!(cfg.report_header_row, 0);
    }

    #[test]
    fn test_password_is_masked() {
        // ---
        let cfg = load(&[("DATABASE_URL", "postgres://pv:secret@db:5432/pv")]).unwrap();
        assert_eq!(cfg.masked_db_url(), "postgres://pv:****@db:5432/pv");

        let cfg = load(&[("DATABASE_URL", "postgres://db:5432/pv")]).unwrap();
        assert_eq!(cfg.masked_db_url(), "postgres://db:5432/pv");

        let cfg = load(&[("DATABASE_URL", "postgres://pv@db/pv")]).unwrap();
        assert_eq!(cfg.masked_db_url(), "postgres://pv@db/pv");
    }
}
