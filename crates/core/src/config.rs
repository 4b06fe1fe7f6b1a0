//! Configuration management for the edgecred agent.
//!
//! Defaults reproduce the well-known daemon socket paths, so a device with a
//! standard installation needs no configuration file at all.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_ENV_VAR: &str = "EDGECRED_CONFIG";

/// API version sent to all three daemons.
pub const DEFAULT_API_VERSION: &str = "2020-09-01";

/// OpenSSL engine that exposes key-daemon keys as `EVP_PKEY` handles.
pub const DEFAULT_ENGINE: &str = "aziot_keys";

/// Upper bound for `token.ttl_secs`: one year.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub daemons: DaemonConfig,
    pub engine: EngineConfig,
    pub token: TokenConfig,
    pub publish: PublishConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub identity_socket: PathBuf,
    pub key_socket: PathBuf,
    pub cert_socket: PathBuf,
    pub api_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime of the shared access token, fixed at generation time.
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Delay applied after every publish attempt.
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            identity_socket: PathBuf::from("/run/aziot/identityd.sock"),
            key_socket: PathBuf::from("/run/aziot/keyd.sock"),
            cert_socket: PathBuf::from("/run/aziot/certd.sock"),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_ENGINE.to_string(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { ttl_secs: 24 * 60 * 60 }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl PublishConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

impl AgentConfig {
    /// Load configuration from `EDGECRED_CONFIG` when set, defaults otherwise.
    pub fn load() -> Result<Self> {
        let config = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        let sockets = [
            ("daemons.identity_socket", &self.daemons.identity_socket),
            ("daemons.key_socket", &self.daemons.key_socket),
            ("daemons.cert_socket", &self.daemons.cert_socket),
        ];
        for (name, path) in sockets {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }
        if self.daemons.api_version.is_empty() {
            return Err(Error::Config("daemons.api_version must not be empty".into()));
        }
        if self.engine.name.is_empty() {
            return Err(Error::Config("engine.name must not be empty".into()));
        }
        if self.token.ttl_secs == 0 {
            return Err(Error::Config("token.ttl_secs must be positive".into()));
        }
        if self.token.ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(Error::Config(format!(
                "token.ttl_secs must not exceed {MAX_TOKEN_TTL_SECS}"
            )));
        }
        if self.publish.interval_ms == 0 {
            return Err(Error::Config("publish.interval_ms must be positive".into()));
        }
        Ok(())
    }
}
