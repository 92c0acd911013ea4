use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_LOADER_CONFIG_JSON: &str = "model_loader_config.json";

/// Version sentinel meaning "whatever the registry considers latest".
pub const LATEST_VERSION: &str = "None";

/// Which model to load and which Azure ML workspace holds it.
///
/// Produced once by [`ConfigResolver`] and never mutated afterwards; use
/// [`ModelLoaderConfig::with_model`] to derive a record for another model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLoaderConfig {
    pub model_name: String,
    pub subscription: String,
    pub resource_group: String,
    pub workspace: String,
    #[serde(default = "latest_version", deserialize_with = "version_or_latest")]
    pub model_version: String,
}

fn latest_version() -> String {
    LATEST_VERSION.to_string()
}

fn version_or_latest<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(latest_version))
}

impl ModelLoaderConfig {
    /// The version to request from the registry, `None` for latest.
    pub fn pinned_version(&self) -> Option<&str> {
        match self.model_version.as_str() {
            "" | LATEST_VERSION => None,
            version => Some(version),
        }
    }

    /// Fails unless the name and version each stay a single directory
    /// below the cache root.
    pub fn check_cache_keys(&self) -> Result<()> {
        check_path_component("model name", &self.model_name)?;
        check_path_component("model version", &self.model_version)
    }

    pub fn with_model(&self, model_name: &str, model_version: Option<&str>) -> Self {
        Self {
            model_name: model_name.to_string(),
            model_version: model_version.map_or_else(latest_version, str::to_string),
            ..self.clone()
        }
    }
}

pub fn check_path_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(Error::InvalidInput(format!("Invalid {}: {:?}", field, value)));
    }
    Ok(())
}

/// Fallback values used when neither a cached file nor the environment
/// provides a setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDefaults {
    pub model_name: String,
    pub subscription: String,
    pub resource_group: String,
    pub workspace: String,
    pub model_version: String,
}

impl Default for ModelDefaults {
    fn default() -> Self {
        Self {
            model_name: "led-large-16384-arxiv".to_string(),
            subscription: "091ac194-317f-4880-9f66-a9c23f42cb60".to_string(),
            resource_group: "dev".to_string(),
            workspace: "ecb-dev".to_string(),
            model_version: LATEST_VERSION.to_string(),
        }
    }
}

/// Resolves a [`ModelLoaderConfig`] from disk, then environment, then defaults.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    base_dir: PathBuf,
    defaults: ModelDefaults,
}

impl ConfigResolver {
    pub fn new(base_dir: impl Into<PathBuf>, defaults: ModelDefaults) -> Self {
        Self {
            base_dir: base_dir.into(),
            defaults,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(MODEL_LOADER_CONFIG_JSON)
    }

    pub fn resolve(&self) -> Result<ModelLoaderConfig> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Same as [`resolve`](Self::resolve) with `lookup` standing in for the
    /// process environment.
    ///
    /// An existing file is returned verbatim and never rewritten. A file that
    /// fails to parse is an error; it is not replaced by environment values.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ModelLoaderConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = self.config_path();

        if config_path.exists() {
            tracing::info!("Found config file {}. Loading cfg from disk", config_path.display());
            let content = fs::read_to_string(&config_path)?;
            return serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
                path: config_path,
                source,
            });
        }

        tracing::info!("No config file found. Loading cfg from env vars");
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let config = ModelLoaderConfig {
            model_name: var("MODEL_NAME", &self.defaults.model_name),
            subscription: var("SUBSCRIPTION", &self.defaults.subscription),
            resource_group: var("RESOURCE_GROUP", &self.defaults.resource_group),
            workspace: var("ML_WORKSPACE", &self.defaults.workspace),
            model_version: var("MODEL_VERSION", &self.defaults.model_version),
        };

        fs::create_dir_all(&self.base_dir)?;
        fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
        tracing::info!("Stored config on disk at {}", config_path.display());

        Ok(config)
    }
}
