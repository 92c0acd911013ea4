use crate::error::{Error, Result};
use crate::model::ModelDefaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Application settings, read from an optional TOML file.
///
/// Every section falls back to the behaviour of a bare deployment: a relative
/// `cache` directory, automatic device selection and the public Azure cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub cache_dir: PathBuf,
	pub device: String,
	pub server: ServerConfig,
	pub registry: RegistryConfig,
	pub defaults: ModelDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
	pub authority_host: String,
	pub management_endpoint: String,
	pub api_version: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
			device: "auto".to_string(),
			server: ServerConfig::default(),
			registry: RegistryConfig::default(),
			defaults: ModelDefaults::default(),
		}
	}
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".to_string(),
			port: 8080,
		}
	}
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			authority_host: "https://login.microsoftonline.com".to_string(),
			management_endpoint: "https://management.azure.com".to_string(),
			api_version: "2024-04-01".to_string(),
		}
	}
}

impl Config {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.map_err(|e| Error::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
		let config: Config = toml::from_str(&content)?;
		Ok(config)
	}

	/// Loads the settings file if one is given (or named by `SUMMARIZER_CONFIG`),
	/// then applies `SUMMARIZER_CACHE_DIR` and `SUMMARIZER_DEVICE`.
	pub fn from_env(path: Option<PathBuf>) -> Result<Self> {
		let path = path.or_else(|| std::env::var("SUMMARIZER_CONFIG").ok().map(PathBuf::from));

		let mut config = match path {
			Some(path) => {
				tracing::info!("Loading settings from {}", path.display());
				Self::load(&path)?
			}
			None => Self::default(),
		};

		if let Ok(cache_dir) = std::env::var("SUMMARIZER_CACHE_DIR") {
			if !cache_dir.is_empty() {
				config.cache_dir = PathBuf::from(cache_dir);
			}
		}
		if let Ok(device) = std::env::var("SUMMARIZER_DEVICE") {
			if !device.is_empty() {
				config.device = device;
			}
		}

		Ok(config)
	}
}
