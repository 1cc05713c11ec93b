use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use axum::http::HeaderName;

use crate::domain::rules::EngineRules;

pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-email";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Directory for the JSON file store. In-memory storage when unset.
    pub data_dir: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
    pub identity_header: HeaderName,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_string("LE_BIND_ADDR", "127.0.0.1:18090")
            .parse::<SocketAddr>()
            .context("LE_BIND_ADDR must be a valid host:port")?;

        let identity_header = env_string("LE_IDENTITY_HEADER", DEFAULT_IDENTITY_HEADER)
            .trim()
            .to_lowercase()
            .parse::<HeaderName>()
            .context("LE_IDENTITY_HEADER must be a valid header name")?;

        Ok(Self {
            bind_addr,
            data_dir: env_path("LE_DATA_DIR"),
            rules_path: env_path("LE_RULES_PATH"),
            identity_header,
        })
    }

    /// Rules from `LE_RULES_PATH`, or the embedded defaults.
    pub fn load_rules(&self) -> Result<EngineRules> {
        match &self.rules_path {
            Some(path) => EngineRules::from_path(path)
                .with_context(|| format!("failed to load rules from {}", path.display())),
            None => EngineRules::embedded().context("embedded rules are invalid"),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
