use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "summarizer")]
#[command(version, about = "Fetch and load summarization models from an Azure ML registry", long_about = None)]
pub struct Cli {
	/// Settings file (TOML)
	#[arg(long, global = true, env = "SUMMARIZER_CONFIG")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Resolve the model loader config and print it
	Config,

	/// Download the model if it is not cached yet, then load it
	Fetch {
		/// Registered model name (defaults to the resolved config)
		#[arg(long)]
		model: Option<String>,

		/// Registered model version (latest when omitted)
		#[arg(long = "model-version", requires = "model")]
		version: Option<String>,

		/// Device to load onto (e.g., "auto", "cpu" or "cuda:0")
		#[arg(long)]
		device: Option<String>,
	},

	/// List models registered in the workspace
	List,

	/// Start the HTTP server
	Serve {
		/// Device to load models onto (e.g., "auto", "cpu" or "cuda:0")
		#[arg(long)]
		device: Option<String>,

		/// Port to listen on
		#[arg(long)]
		port: Option<u16>,

		/// Host to bind to
		#[arg(long)]
		host: Option<String>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn test_cli_definition() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_version_requires_model() {
		assert!(Cli::try_parse_from(["summarizer", "fetch", "--model-version", "2"]).is_err());
		assert!(Cli::try_parse_from(["summarizer", "fetch", "--model", "m", "--model-version", "2"]).is_ok());
	}
}
