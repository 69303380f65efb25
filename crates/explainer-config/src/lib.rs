//! Runtime configuration for the artifact explainer.
//!
//! Configuration comes from an optional `config.json` (every field has a
//! default) with a handful of environment variables layered on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_CATALOG: &str = "ARTIFACT_CATALOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    pub remote: RemoteConfig,
    pub model_service: ModelServiceConfig,
    pub local_model: LocalModelConfig,
    /// JSON array of artifact records.
    pub catalog_path: PathBuf,
    /// Directories searched when resolving relative image paths.
    pub image_roots: Vec<PathBuf>,
    pub log_dir: PathBuf,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            model_service: ModelServiceConfig::default(),
            local_model: LocalModelConfig::default(),
            catalog_path: PathBuf::from("data/artifacts.json"),
            image_roots: vec![
                PathBuf::from("frontend/public"),
                PathBuf::from("static"),
                PathBuf::from("."),
            ],
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// OpenAI-compatible remote inference endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote tier is only offered when a key is present.
    pub api_key: Option<String>,
    pub base_url: String,
    pub text_model: String,
    pub structured_model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            text_model: "gpt-3.5-turbo".to_string(),
            structured_model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl RemoteConfig {
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The offline comparison model running as a child process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServiceConfig {
    pub enabled: bool,
    /// Executable to run. `None` re-runs the current binary with `model-service`.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub handshake_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: None,
            args: Vec::new(),
            working_dir: None,
            handshake_timeout_secs: 60,
            request_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl ModelServiceConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// The in-process explainer warmed up in the background.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    pub enabled: bool,
    /// Longest time `explain` blocks waiting for warmup to finish.
    pub warmup_wait_secs: u64,
    /// Generations of this many characters or fewer are discarded.
    pub min_explanation_chars: usize,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_wait_secs: 10,
            min_explanation_chars: 50,
        }
    }
}

impl LocalModelConfig {
    pub fn warmup_wait(&self) -> Duration {
        Duration::from_secs(self.warmup_wait_secs)
    }
}

impl ExplainerConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, `config.json` in the
    /// working directory is used when present, defaults otherwise.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if !p.exists() => return Err(ConfigError::NotFound(p.to_path_buf())),
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Layer environment variables over the loaded values. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_API_KEY) {
            self.remote.api_key = Some(key);
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.remote.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(catalog) = non_empty(ENV_CATALOG) {
            self.catalog_path = PathBuf::from(catalog);
        }
    }
}
