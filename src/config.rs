//! Configuration loading
//!
//! Resolution order, lowest to highest priority:
//! 1. Compiled defaults
//! 2. TOML config file (`--config` / `PUMPV_CONFIG`)
//! 3. Environment variables (`PUMPV_DATABASE`, `PUMPV_BIND`, `PUMPV_LOG`)
//! 4. Command-line flags (applied by the binaries)

use crate::error::{Error, Result};
use crate::pagination::PageSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "PUMPV_DATABASE";
pub const ENV_BIND: &str = "PUMPV_BIND";
pub const ENV_LOG: &str = "PUMPV_LOG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub verification: VerificationConfig,
    pub auth: AuthConfig,
    pub pagination: PageSettings,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:4000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("pump-verification.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// How many times a verification that lost an optimistic-version race is
    /// re-run before the caller gets CONFLICT
    pub conflict_retries: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        VerificationConfig {
            conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of a token issued by `POST /auth/login`
    pub session_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            session_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl AuthConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults, overlaid with the file at `path` when one is given
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Config::from_toml_str(&content)?
            }
            None => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `PUMPV_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log.filter = filter;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind.trim().is_empty() {
            return Err(Error::Config("server.bind cannot be empty".to_string()));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Config("database.path cannot be empty".to_string()));
        }
        if self.auth.session_ttl_secs < 1 {
            return Err(Error::Config(
                "auth.session_ttl_secs must be positive".to_string(),
            ));
        }
        if self.pagination.default_limit < 1 || self.pagination.max_limit < 1 {
            return Err(Error::Config(
                "pagination limits must be positive".to_string(),
            ));
        }
        if self.pagination.default_limit > self.pagination.max_limit {
            return Err(Error::Config(
                "pagination.default_limit cannot exceed pagination.max_limit".to_string(),
            ));
        }
        Ok(())
    }
}
