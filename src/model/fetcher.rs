use crate::config::Config;
use crate::error::Result;
use crate::loader::ArtifactLoader;
use crate::model::{ArtifactCache, ConfigResolver, ModelLoaderConfig, ModelRegistry, ServicePrincipal, WorkspaceRef};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Makes a registered model available locally and hands it to a loader.
pub struct ModelFetcher<L> {
    registry: Arc<dyn ModelRegistry>,
    loader: L,
    cache: ArtifactCache,
    resolver: ConfigResolver,
    credentials: Option<ServicePrincipal>,
}

impl<L: ArtifactLoader> ModelFetcher<L> {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        loader: L,
        cache: ArtifactCache,
        resolver: ConfigResolver,
    ) -> Self {
        Self {
            registry,
            loader,
            cache,
            resolver,
            credentials: None,
        }
    }

    /// Cache and loader config both live under `config.cache_dir`.
    pub fn from_config(config: &Config, registry: Arc<dyn ModelRegistry>, loader: L) -> Self {
        Self::new(
            registry,
            loader,
            ArtifactCache::new(&config.cache_dir),
            ConfigResolver::new(&config.cache_dir, config.defaults.clone()),
        )
    }

    /// Uses `credentials` for every session instead of reading the environment.
    pub fn with_credentials(mut self, credentials: ServicePrincipal) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    fn credentials(&self) -> ServicePrincipal {
        self.credentials
            .clone()
            .unwrap_or_else(ServicePrincipal::from_env)
    }

    /// Returns the loaded model and tokenizer for `config`, or for the
    /// resolved config when `None`.
    ///
    /// A present artifact directory is trusted as-is; the registry is only
    /// contacted on a miss.
    pub fn fetch(&self, config: Option<&ModelLoaderConfig>) -> Result<(L::Model, L::Tokenizer)> {
        let auth = self.credentials();
        let config = match config {
            Some(config) => config.clone(),
            None => self.resolver.resolve()?,
        };

        let model_path = self.ensure_local(&config, &auth)?;
        self.loader.load(&model_path)
    }

    fn ensure_local(&self, config: &ModelLoaderConfig, auth: &ServicePrincipal) -> Result<PathBuf> {
        config.check_cache_keys()?;

        let model_path = self.cache.artifact_path(config);
        if model_path.exists() {
            tracing::info!("Loading model from local cache");
            return Ok(model_path);
        }

        let _lock = self.cache.lock(config)?;
        if model_path.exists() {
            tracing::info!("Model was stored by a concurrent fetch, loading from local cache");
            return Ok(model_path);
        }

        let staging = self.cache.staging_dir(config);
        if staging.exists() {
            tracing::warn!("Removing leftover download at {}", staging.display());
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let session = self.registry.connect(&WorkspaceRef::from(config), auth)?;
        tracing::info!("Loading model from ml registry: {}", session.name());

        let downloaded = session.download(&config.model_name, config.pinned_version(), &staging)?;
        fs::rename(&downloaded, &model_path)?;

        if let Err(e) = fs::remove_dir_all(&staging) {
            tracing::warn!("Could not remove {}: {}", staging.display(), e);
        }
        tracing::info!("Loaded model from ml registry and stored it: {}", model_path.display());

        Ok(model_path)
    }

    /// Every registered model of the configured workspace as `name::version`.
    pub fn list_model_names(&self) -> Result<Vec<String>> {
        tracing::info!("Getting existing model names from registry");

        let config = self.resolver.resolve()?;
        let auth = self.credentials();
        let session = self.registry.connect(&WorkspaceRef::from(&config), &auth)?;

        Ok(session
            .list_models()?
            .iter()
            .map(ToString::to_string)
            .collect())
    }
}
