use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Model not found: {0}")]
	ModelNotFound(String),

	#[error("Failed to load model: {0}")]
	ModelLoadFailed(String),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("Authentication failed: {0}")]
	AuthenticationFailed(String),

	#[error("Registry error: {0}")]
	RegistryError(String),

	#[error("Download failed: {0}")]
	DownloadFailed(String),

	#[error("Configuration error: {0}")]
	ConfigError(String),

	/// The cached loader config exists but is not valid JSON for the record.
	#[error("Could not parse config file {}: {source}", path.display())]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	SerializationError(String),
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::ConfigError(err.to_string())
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		Error::RegistryError(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
