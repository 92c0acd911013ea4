#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use summarizer::loader::ArtifactLoader;
use summarizer::model::{
    ArtifactCache, ConfigResolver, ModelDefaults, ModelFetcher, ModelLoaderConfig, ModelRegistry,
    RegisteredModel, ServicePrincipal, WorkspaceRef, WorkspaceSession, MODEL_LOADER_CONFIG_JSON,
};
use summarizer::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCall {
    pub model_name: String,
    pub version: Option<String>,
    pub target_dir: PathBuf,
}

#[derive(Default)]
pub struct RegistryLog {
    pub connects: AtomicUsize,
    pub workspaces: Mutex<Vec<WorkspaceRef>>,
    pub downloads: Mutex<Vec<DownloadCall>>,
}

/// In-memory registry that writes a `config.json` per downloaded model.
#[derive(Clone, Default)]
pub struct FakeRegistry {
    pub log: Arc<RegistryLog>,
    pub models: Vec<RegisteredModel>,
    pub fail_download: bool,
    pub download_delay: Option<Duration>,
}

impl FakeRegistry {
    pub fn with_models(models: &[(&str, &str)]) -> Self {
        Self {
            models: models
                .iter()
                .map(|(name, version)| RegisteredModel {
                    name: name.to_string(),
                    version: version.to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_download: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            download_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.log.connects.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> Vec<DownloadCall> {
        self.log.downloads.lock().unwrap().clone()
    }
}

impl ModelRegistry for FakeRegistry {
    fn connect(
        &self,
        workspace: &WorkspaceRef,
        _auth: &ServicePrincipal,
    ) -> Result<Box<dyn WorkspaceSession>> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        self.log.workspaces.lock().unwrap().push(workspace.clone());
        Ok(Box::new(FakeSession {
            registry: self.clone(),
            name: workspace.name.clone(),
        }))
    }
}

struct FakeSession {
    registry: FakeRegistry,
    name: String,
}

impl WorkspaceSession for FakeSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_models(&self) -> Result<Vec<RegisteredModel>> {
        Ok(self.registry.models.clone())
    }

    fn download(&self, model_name: &str, version: Option<&str>, target_dir: &Path) -> Result<PathBuf> {
        self.registry.log.downloads.lock().unwrap().push(DownloadCall {
            model_name: model_name.to_string(),
            version: version.map(str::to_string),
            target_dir: target_dir.to_path_buf(),
        });

        if let Some(delay) = self.registry.download_delay {
            std::thread::sleep(delay);
        }

        let model_dir = target_dir.join(model_name);
        fs::create_dir_all(&model_dir)?;
        fs::write(model_dir.join("config.json"), format!("{{\"name\": \"{}\"}}", model_name))?;

        if self.registry.fail_download {
            return Err(Error::DownloadFailed("connection reset".to_string()));
        }
        Ok(model_dir)
    }
}

/// Loader that hands back the directory it was asked to load.
#[derive(Default)]
pub struct FakeLoader {
    pub loads: Mutex<Vec<PathBuf>>,
}

impl ArtifactLoader for FakeLoader {
    type Model = PathBuf;
    type Tokenizer = String;

    fn load(&self, model_dir: &Path) -> Result<(PathBuf, String)> {
        if !model_dir.join("config.json").exists() {
            return Err(Error::ModelLoadFailed(format!("no config in {}", model_dir.display())));
        }
        self.loads.lock().unwrap().push(model_dir.to_path_buf());
        Ok((model_dir.to_path_buf(), "tokenizer".to_string()))
    }
}

pub fn test_config(model_name: &str, model_version: &str) -> ModelLoaderConfig {
    ModelLoaderConfig {
        model_name: model_name.to_string(),
        subscription: "sub-1".to_string(),
        resource_group: "dev".to_string(),
        workspace: "ecb-dev".to_string(),
        model_version: model_version.to_string(),
    }
}

/// Stores `config` as the cached loader config so resolution never reads the
/// process environment.
pub fn write_loader_config(cache_dir: &Path, config: &ModelLoaderConfig) {
    fs::create_dir_all(cache_dir).unwrap();
    fs::write(
        cache_dir.join(MODEL_LOADER_CONFIG_JSON),
        serde_json::to_string(config).unwrap(),
    )
    .unwrap();
}

pub fn fetcher(cache_dir: &Path, registry: &FakeRegistry) -> ModelFetcher<FakeLoader> {
    ModelFetcher::new(
        Arc::new(registry.clone()),
        FakeLoader::default(),
        ArtifactCache::new(cache_dir),
        ConfigResolver::new(cache_dir, ModelDefaults::default()),
    )
    .with_credentials(ServicePrincipal::new("tenant", "client", "secret"))
}
