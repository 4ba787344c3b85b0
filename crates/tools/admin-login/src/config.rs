//! Configuration for the admin-login tool
//!
//! Sources, lowest precedence first:
//! - `admin-login.toml` (or the file named by `--config` / `ADMIN_LOGIN_CONFIG_FILE`)
//! - Environment variables with the `ADMIN_LOGIN` prefix, e.g. `ADMIN_LOGIN__OAUTH__CLIENT_ID`
//! - `RUST_LOG` for the log level

use admin_identity_oauth2::OAuth2ClientConfig;
use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "admin-login.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity provider and client registration
    pub oauth: OAuth2ClientConfig,

    #[serde(default)]
    pub login: LoginConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// How long to wait for the provider to redirect back
    pub callback_timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            callback_timeout_seconds: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the config file, the environment and `RUST_LOG`.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut settings = Self::from_sources(config_file, Environment::default())?;

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Build from an optional config file and an environment source. `env`
    /// only contributes its variable map; prefix and separators are fixed.
    pub fn from_sources(config_file: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_file {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                tracing::debug!("Loading configuration from {}", DEFAULT_CONFIG_FILE);
                builder = builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml));
            }
            None => {
                tracing::debug!("No {} found, using environment only", DEFAULT_CONFIG_FILE);
            }
        }

        builder = builder.add_source(
            env.prefix("ADMIN_LOGIN")
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("oauth.scopes")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.oauth
            .validate()
            .context("Invalid [oauth] configuration")?;

        if self.login.callback_timeout_seconds == 0 {
            anyhow::bail!("login.callback_timeout_seconds must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !self.is_filter_directive() && !valid_levels.contains(&level_lower.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.login.callback_timeout_seconds)
    }

    /// Get the log filter string for tracing
    pub fn log_filter(&self) -> String {
        if self.is_filter_directive() {
            self.logging.level.clone()
        } else {
            format!(
                "admin_login={},admin_identity_oauth2={},warn",
                self.logging.level, self.logging.level
            )
        }
    }

    fn is_filter_directive(&self) -> bool {
        self.logging.level.contains('=') || self.logging.level.contains(',')
    }
}
