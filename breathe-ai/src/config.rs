//! Configuration for breathe-ai
//!
//! Bootstrap configuration is resolved with CLI → ENV → TOML → compiled
//! default priority. CLI flags and environment variables arrive through
//! [`ConfigOverrides`] (clap handles the CLI/ENV precedence); the root folder
//! goes through the shared resolver instead.

use breathe_common::config::LoggingConfig;
use breathe_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default HTTP port for breathe-ai
pub const DEFAULT_PORT: u16 = 5730;

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "BREATHE_ROOT_FOLDER";

/// TOML file name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "breathe-ai.toml";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the database and uploads (optional)
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub classifier: ClassifierConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Audio store limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Largest accepted upload (default 50 MiB)
    pub max_upload_bytes: u64,
    /// Total store size limit; unlimited when absent
    pub max_store_bytes: Option<u64>,
    /// Longest generated stored file name component kept from the client name
    pub max_filename_len: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
            max_store_bytes: None,
            max_filename_len: 96,
        }
    }
}

/// External classifier invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Program and leading arguments; the artifact path is appended
    pub command: Vec<String>,
    /// Hard wall-clock limit per invocation
    pub timeout_secs: u64,
    /// Maximum classifier processes running at once
    pub max_concurrent: usize,
    /// Capture cap for each of stdout and stderr
    pub max_output_bytes: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "ml-model/predict.py".to_string()],
            timeout_secs: 30,
            max_concurrent: 4,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    /// Whitespace-separated program and arguments
    pub classifier_command: Option<String>,
    pub classifier_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Apply CLI/ENV overrides on top of the TOML values
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(command) = &overrides.classifier_command {
            self.classifier.command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Some(timeout) = overrides.classifier_timeout_secs {
            self.classifier.timeout_secs = timeout;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.classifier.command.is_empty() || self.classifier.command[0].trim().is_empty() {
            return Err(Error::Config("classifier.command must name a program".to_string()));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(Error::Config("classifier.timeout_secs must be at least 1".to_string()));
        }
        if self.classifier.max_concurrent == 0 {
            return Err(Error::Config("classifier.max_concurrent must be at least 1".to_string()));
        }
        if self.classifier.max_output_bytes == 0 {
            return Err(Error::Config("classifier.max_output_bytes must be at least 1".to_string()));
        }
        if self.storage.max_upload_bytes == 0 {
            return Err(Error::Config("storage.max_upload_bytes must be at least 1".to_string()));
        }
        if self.storage.max_filename_len < 16 {
            return Err(Error::Config("storage.max_filename_len must be at least 16".to_string()));
        }
        Ok(())
    }

    /// Resolve the root folder: CLI argument, then BREATHE_ROOT_FOLDER, then TOML
    pub fn resolve_root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        breathe_common::config::resolve_root_folder(
            cli_arg,
            ROOT_FOLDER_ENV,
            self.root_folder.as_deref(),
        )
    }
}

/// Compiled defaults rendered as a TOML document
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&TomlConfig::default())
        .map_err(|e| Error::Config(format!("Failed to render default config: {}", e)))
}

/// Load the TOML config from an explicit path or the platform default
///
/// A missing file yields compiled defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(path) => Some(path.to_path_buf()),
        None => breathe_common::config::default_config_path(CONFIG_FILE_NAME),
    };

    match path {
        Some(path) => breathe_common::config::load_toml_config(&path),
        None => {
            tracing::warn!(
                "No {} found in config directories (using compiled defaults)",
                CONFIG_FILE_NAME
            );
            Ok(TomlConfig::default())
        }
    }
}
