//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     VENDRA_SESSION_TIMEOUT_SECS=900                                    │
//! │     VENDRA_DB_PATH=/var/lib/vendra/shop.db                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/vendra-pos/vendra.toml (Linux)                           │
//! │     ~/Library/Application Support/com.vendra.pos/vendra.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     30 min inactivity timeout, 60 s watchdog period, "VNT" prefix      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [session]
//! inactivity_timeout_secs = 1800
//! watchdog_period_secs = 60
//!
//! [sales]
//! sale_number_prefix = "VNT"
//! max_cart_lines = 100
//! default_payment_method = "CASH"
//!
//! [database]
//! path = "vendra.db"
//! max_connections = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use vendra_core::{PaymentMethod, MAX_CART_LINES};
use vendra_db::DbConfig;

use crate::error::ConfigError;

// =============================================================================
// Session Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Idle time after which the session expires.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// How often the watchdog checks for idleness.
    #[serde(default = "default_watchdog_period")]
    pub watchdog_period_secs: u64,
}

fn default_inactivity_timeout() -> u64 {
    30 * 60
}

fn default_watchdog_period() -> u64 {
    60
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            inactivity_timeout_secs: default_inactivity_timeout(),
            watchdog_period_secs: default_watchdog_period(),
        }
    }
}

impl SessionSettings {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.watchdog_period_secs)
    }
}

// =============================================================================
// Sales Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesSettings {
    /// First segment of every sale number.
    #[serde(default = "default_sale_prefix")]
    pub sale_number_prefix: String,

    /// Distinct lines allowed in one cart. Capped at [`MAX_CART_LINES`].
    #[serde(default = "default_max_cart_lines")]
    pub max_cart_lines: usize,

    /// Payment method preselected on a fresh cart.
    #[serde(default)]
    pub default_payment_method: PaymentMethod,
}

fn default_sale_prefix() -> String {
    "VNT".to_string()
}

fn default_max_cart_lines() -> usize {
    MAX_CART_LINES
}

impl Default for SalesSettings {
    fn default() -> Self {
        SalesSettings {
            sale_number_prefix: default_sale_prefix(),
            max_cart_lines: default_max_cart_lines(),
            default_payment_method: PaymentMethod::default(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vendra.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// Pool configuration for [`vendra_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.path).max_connections(self.max_connections)
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub sales: SalesSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (vendra.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if anything goes wrong.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses one TOML file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration to file, creating parent directories.
    pub fn save(&self, config_path: Option<PathBuf>) -> Result<(), ConfigError> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::SaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.inactivity_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "inactivity_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.watchdog_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "watchdog_period_secs must be greater than 0".into(),
            ));
        }

        if self.session.watchdog_period_secs > self.session.inactivity_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "watchdog_period_secs ({}) must not exceed inactivity_timeout_secs ({})",
                self.session.watchdog_period_secs, self.session.inactivity_timeout_secs
            )));
        }

        let prefix = &self.sales.sale_number_prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(format!(
                "sale_number_prefix must be non-empty ASCII alphanumeric, got '{prefix}'"
            )));
        }

        if self.sales.max_cart_lines == 0 || self.sales.max_cart_lines > MAX_CART_LINES {
            return Err(ConfigError::Invalid(format!(
                "max_cart_lines must be between 1 and {MAX_CART_LINES}"
            )));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `VENDRA_*` overrides read through `lookup`. Unparseable
    /// values are logged and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("VENDRA_SESSION_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => {
                    debug!(secs, "Overriding inactivity timeout from environment");
                    self.session.inactivity_timeout_secs = secs;
                }
                Err(_) => warn!(value = %value, "Ignoring invalid VENDRA_SESSION_TIMEOUT_SECS"),
            }
        }

        if let Some(value) = lookup("VENDRA_WATCHDOG_PERIOD_SECS") {
            match value.parse::<u64>() {
                Ok(secs) => self.session.watchdog_period_secs = secs,
                Err(_) => warn!(value = %value, "Ignoring invalid VENDRA_WATCHDOG_PERIOD_SECS"),
            }
        }

        if let Some(prefix) = lookup("VENDRA_SALE_PREFIX") {
            debug!(prefix = %prefix, "Overriding sale number prefix from environment");
            self.sales.sale_number_prefix = prefix;
        }

        if let Some(path) = lookup("VENDRA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "vendra", "pos")
            .map(|dirs| dirs.config_dir().join("vendra.toml"))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vendra-config-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.session.inactivity_timeout(), Duration::from_secs(1800));
        assert_eq!(config.session.watchdog_period(), Duration::from_secs(60));
        assert_eq!(config.sales.sale_number_prefix, "VNT");
        assert_eq!(config.sales.max_cart_lines, MAX_CART_LINES);
        assert_eq!(config.sales.default_payment_method, PaymentMethod::Cash);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [session]
            inactivity_timeout_secs = 600

            [sales]
            default_payment_method = "MOBILE"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.inactivity_timeout_secs, 600);
        assert_eq!(config.session.watchdog_period_secs, 60);
        assert_eq!(config.sales.default_payment_method, PaymentMethod::Mobile);
        assert_eq!(config.database.path, PathBuf::from("vendra.db"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VENDRA_SESSION_TIMEOUT_SECS", "900"),
            ("VENDRA_WATCHDOG_PERIOD_SECS", "soon"),
            ("VENDRA_SALE_PREFIX", "TILL2"),
            ("VENDRA_DB_PATH", "/tmp/shop.db"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.session.inactivity_timeout_secs, 900);
        // Unparseable value is ignored
        assert_eq!(config.session.watchdog_period_secs, 60);
        assert_eq!(config.sales.sale_number_prefix, "TILL2");
        assert_eq!(config.database.path, PathBuf::from("/tmp/shop.db"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.session.inactivity_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.session.watchdog_period_secs = 3600;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sales.sale_number_prefix = "V-NT".into();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sales.max_cart_lines = MAX_CART_LINES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_path("vendra.toml");
        let mut config = EngineConfig::default();
        config.sales.sale_number_prefix = "SHOP".into();
        config.session.inactivity_timeout_secs = 1200;

        config.save(Some(path.clone())).unwrap();
        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EngineConfig::load_or_default(Some(temp_path("absent.toml")));
        assert_eq!(config.sales.max_cart_lines, MAX_CART_LINES);
    }

    #[test]
    fn test_malformed_file() {
        let path = temp_path("broken.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[session\ninactivity_timeout_secs = ").unwrap();

        assert!(matches!(
            EngineConfig::from_file(&path),
            Err(ConfigError::LoadFailed(_))
        ));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
