//! Configuration loader

use std::collections::HashSet;
use std::path::Path;

use gateway_utils::{config_file, GatewayError, Result};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(GatewayError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| GatewayError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| GatewayError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `MCP_HOST` / `MCP_PORT` on top of the configured bind address
    pub fn apply_env_overrides(config: &mut AppConfig) {
        Self::apply_overrides(
            config,
            std::env::var("MCP_HOST").ok(),
            std::env::var("MCP_PORT").ok(),
        );
    }

    fn apply_overrides(config: &mut AppConfig, host: Option<String>, port: Option<String>) {
        if host.is_none() && port.is_none() {
            return;
        }

        let (current_host, current_port) = match config.server.bind.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.to_string()),
            None => (config.server.bind.clone(), "8000".to_string()),
        };
        config.server.bind = format!(
            "{}:{}",
            host.unwrap_or(current_host),
            port.unwrap_or(current_port)
        );
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        let shipper = &config.log_shipper;

        if shipper.buffer_size == 0 {
            return Err(GatewayError::config("log_shipper.buffer_size must be at least 1"));
        }

        if shipper.max_retries == 0 {
            return Err(GatewayError::config("log_shipper.max_retries must be at least 1"));
        }

        if shipper.flush_interval_ms < 1_000 {
            return Err(GatewayError::config(
                "log_shipper.flush_interval_ms must be at least 1000",
            ));
        }

        if config.server.max_body_bytes == 0 {
            return Err(GatewayError::config("server.max_body_bytes must be positive"));
        }

        let mut keys = HashSet::new();
        let mut ids = HashSet::new();
        for app in &config.apps {
            if app.app_id.is_empty() || app.api_key.is_empty() {
                return Err(GatewayError::config("apps entries need an app_id and api_key"));
            }
            if !ids.insert(app.app_id.as_str()) {
                return Err(GatewayError::config(format!(
                    "duplicate app_id '{}'",
                    app.app_id
                )));
            }
            if !keys.insert(app.api_key.as_str()) {
                return Err(GatewayError::config(format!(
                    "api_key of app '{}' is already in use",
                    app.app_id
                )));
            }
        }

        Ok(())
    }

    /// Load, apply environment overrides and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::apply_env_overrides(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }
}
