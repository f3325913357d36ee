//! # Application Configuration
//!
//! `termgraph.toml` holds three tables: `[engine]` (passed through to the
//! core), `[remote]` (authoring service) and `[server]` (query API).
//! Every field defaults, and `TERMGRAPH_*` environment variables override
//! the file.
//!
//! ```toml
//! [engine]
//! cache_dir = "/var/cache/termgraph"
//! environment = "prod"
//! load_all_refsets = true
//!
//! [remote]
//! url = "https://authoring.example.org/api"
//!
//! [server]
//! port = 8080
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use termgraph_core::{EngineConfig, GraphError};

/// File read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "termgraph.toml";

/// Authoring service connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; remote features are disabled when unset.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: 60,
        }
    }
}

/// Query API listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer key required on every endpoint except `/health`.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub remote: RemoteConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Read the configuration file, then apply environment overrides.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, GraphError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| GraphError::Config(format!("read {}: {}", path.display(), e)))?;
            let config = Self::parse(&raw)?;
            tracing::debug!(path = %path.display(), "configuration file loaded");
            config
        } else if required {
            return Err(GraphError::Config(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.engine.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        toml::from_str(raw).map_err(|e| GraphError::Config(e.to_string()))
    }

    /// Apply `TERMGRAPH_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(dir) = non_empty("TERMGRAPH_CACHE_DIR") {
            self.engine.cache_dir = PathBuf::from(dir);
        }
        if let Some(env) = non_empty("TERMGRAPH_ENVIRONMENT") {
            self.engine.environment = env;
        }
        if let Some(flag) = non_empty("TERMGRAPH_ALLOW_STALE") {
            self.engine.allow_stale = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(url) = non_empty("TERMGRAPH_REMOTE_URL") {
            self.remote.url = Some(url);
        }
        if let Some(key) = non_empty("TERMGRAPH_REMOTE_API_KEY") {
            self.remote.api_key = Some(key);
        }
        if let Some(key) = non_empty("TERMGRAPH_API_KEY") {
            self.server.api_key = Some(key);
        }
    }
}
