use crate::error::Result;
use crate::model::{ModelLoaderConfig, ServicePrincipal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Coordinates of the remote workspace holding the models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRef {
    pub subscription: String,
    pub resource_group: String,
    pub name: String,
}

impl From<&ModelLoaderConfig> for WorkspaceRef {
    fn from(config: &ModelLoaderConfig) -> Self {
        Self {
            subscription: config.subscription.clone(),
            resource_group: config.resource_group.clone(),
            name: config.workspace.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub version: String,
}

impl fmt::Display for RegisteredModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.name, self.version)
    }
}

/// A remote model registry.
pub trait ModelRegistry: Send + Sync {
    /// Authenticates and opens a session on the given workspace.
    fn connect(
        &self,
        workspace: &WorkspaceRef,
        auth: &ServicePrincipal,
    ) -> Result<Box<dyn WorkspaceSession>>;
}

/// An authenticated handle on one workspace.
pub trait WorkspaceSession {
    fn name(&self) -> &str;

    fn list_models(&self) -> Result<Vec<RegisteredModel>>;

    /// Downloads `model_name` into `target_dir`, returning the directory the
    /// artifacts were written to (`target_dir/<model_name>`).
    ///
    /// Files already present in the target are left as they are.
    fn download(
        &self,
        model_name: &str,
        version: Option<&str>,
        target_dir: &Path,
    ) -> Result<PathBuf>;
}
