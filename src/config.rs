use crate::pipeline::batch::BatchConfig;
use crate::pipeline::invoke::RetryConfig;
use crate::pipeline::scheduler::SchedulerConfig;
use crate::pipeline::segmenter::SegmenterConfig;
use crate::transform::http::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub segmenter: SegmenterConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub service: ServiceConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    panic!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LONGFORM_ENDPOINT → service.endpoint
    /// - LONGFORM_API_KEY → service.api_key
    /// - LONGFORM_MODEL → service.model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("LONGFORM_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.service.endpoint = endpoint;
        }
        if let Ok(api_key) = std::env::var("LONGFORM_API_KEY")
            && !api_key.is_empty()
        {
            self.service.api_key = api_key;
        }
        if let Ok(model) = std::env::var("LONGFORM_MODEL")
            && !model.is_empty()
        {
            self.service.model = model;
        }
        self
    }

    /// Default configuration file location: `~/.config/longform/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("longform")
            .join("config.toml")
    }
}
