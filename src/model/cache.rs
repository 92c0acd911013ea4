//! Local artifact cache layout.
//!
//! ```text
//! cache/
//! ├── model_loader_config.json
//! └── led-large-16384-arxiv/
//!     └── None/
//!         ├── .lock
//!         └── led-large-16384-arxiv/
//!             ├── config.json
//!             ├── model.safetensors
//!             └── tokenizer.json
//! ```

use crate::error::Result;
use crate::model::ModelLoaderConfig;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<model_name>/<model_version>`
    pub fn version_dir(&self, config: &ModelLoaderConfig) -> PathBuf {
        self.root.join(&config.model_name).join(&config.model_version)
    }

    /// `<root>/<model_name>/<model_version>/<model_name>`
    pub fn artifact_path(&self, config: &ModelLoaderConfig) -> PathBuf {
        self.version_dir(config).join(&config.model_name)
    }

    pub fn staging_dir(&self, config: &ModelLoaderConfig) -> PathBuf {
        self.version_dir(config)
            .join(format!(".staging-{}", std::process::id()))
    }

    /// Blocks until this process holds the fill lock for `config`'s version.
    pub fn lock(&self, config: &ModelLoaderConfig) -> Result<CacheLock> {
        config.check_cache_keys()?;
        let dir = self.version_dir(config);
        fs::create_dir_all(&dir)?;

        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        file.lock()?;

        Ok(CacheLock { file })
    }
}

/// Exclusive advisory lock on a version directory, released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Could not release cache lock: {}", e);
        }
    }
}
