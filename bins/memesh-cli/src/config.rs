use memesh_client::{urls, HttpClientConfig};
use memesh_core::config::CoreConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct MemeshConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpClientConfig,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub api_base_url: String,
    /// Socket.io endpoint; the API base when absent.
    #[serde(default)]
    pub realtime_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io")]
    Io,
    #[error("parse")]
    Parse,
    #[error("invalid {0}")]
    Invalid(&'static str),
}

impl MemeshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        urls::validated_base(&self.server.api_base_url)
            .map_err(|_| ConfigError::Invalid("server.api_base_url"))?;
        if let Some(realtime) = self.server.realtime_url.as_deref() {
            urls::validated_base(realtime).map_err(|_| ConfigError::Invalid("server.realtime_url"))?;
        }
        if self.core.event_buffer == 0 {
            return Err(ConfigError::Invalid("core.event_buffer"));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<MemeshConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|_| ConfigError::Io)?;
    let cfg: MemeshConfig = toml::from_str(&content).map_err(|_| ConfigError::Parse)?;
    cfg.validate()?;
    Ok(cfg)
}
