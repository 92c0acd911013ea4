use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use summarizer::cli::{Cli, Commands};
use summarizer::config::Config;
use summarizer::loader::{CandleLoader, DeviceChoice};
use summarizer::model::{AzureMlRegistry, ModelFetcher};
use summarizer::server;

fn build_fetcher(config: &Config, device: Option<&str>) -> anyhow::Result<ModelFetcher<CandleLoader>> {
    let choice: DeviceChoice = device.unwrap_or(config.device.as_str()).parse()?;
    let loader = CandleLoader::from_choice(choice)?;
    let registry = Arc::new(AzureMlRegistry::new(config.registry.clone()));

    tracing::info!("Using device {:?}", loader.device());
    Ok(ModelFetcher::from_config(config, registry, loader))
}

/// Runs blocking registry and disk work off the async runtime.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Blocking task panicked")?
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env(cli.config).context("Failed to load settings")?;

    match cli.command {
        Commands::Config => {
            let resolver = summarizer::model::ConfigResolver::new(&config.cache_dir, config.defaults.clone());
            let path = resolver.config_path();
            let resolved = blocking(move || Ok(resolver.resolve()?)).await?;

            println!("{}", serde_json::to_string_pretty(&resolved)?);
            println!("  Stored at: {:?}", path);
        }

        Commands::Fetch {
            model,
            version,
            device,
        } => {
            let fetcher = build_fetcher(&config, device.as_deref())?;

            let (model, _tokenizer) = blocking(move || {
                let selected = match model {
                    Some(name) => Some(fetcher.resolver().resolve()?.with_model(&name, version.as_deref())),
                    None => None,
                };
                fetcher
                    .fetch(selected.as_ref())
                    .context("Failed to fetch model")
            })
            .await?;

            println!("✓ Model ready");
            println!("  Type: {}", model.model_type());
            println!("  Path: {:?}", model.weights_path());
            println!("  Device: {:?}", model.device());
        }

        Commands::List => {
            let fetcher = build_fetcher(&config, Some("cpu"))?;
            let names = blocking(move || Ok(fetcher.list_model_names()?)).await?;

            if names.is_empty() {
                println!("No models registered.");
            } else {
                println!("Registered models:\n");
                for name in names {
                    println!("  {}", name);
                }
            }
        }

        Commands::Serve { device, port, host } => {
            let fetcher = build_fetcher(&config, device.as_deref())?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            println!("🚀 Summarizer server starting...");
            println!("   Listening on: http://{}:{}", host, port);
            println!("   Docs: http://{}:{}/docs", host, port);
            println!("   Readiness: http://{}:{}/readiness", host, port);

            server::serve(&host, port, server::AppState::new(fetcher)).await?;
        }
    }

    Ok(())
}
