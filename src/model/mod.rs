pub mod azureml;
pub mod cache;
pub mod credentials;
pub mod fetcher;
pub mod loader_config;
pub mod registry;

pub use azureml::AzureMlRegistry;
pub use cache::{ArtifactCache, CacheLock};
pub use credentials::ServicePrincipal;
pub use fetcher::ModelFetcher;
pub use loader_config::{check_path_component, ConfigResolver, ModelDefaults, ModelLoaderConfig, LATEST_VERSION, MODEL_LOADER_CONFIG_JSON};
pub use registry::{ModelRegistry, RegisteredModel, WorkspaceRef, WorkspaceSession};
