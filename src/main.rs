use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use explainer_config::ExplainerConfig;
use explainer_types::Artifact;
use log::info;
use serde::Serialize;
use serde_json::json;

use artifact_explainer::catalog::{ArtifactStore, JsonArtifactCatalog};
use artifact_explainer::logger::{setup_logging, setup_service_logging};
use artifact_explainer::orchestrator::FallbackOrchestrator;
use artifact_explainer::service::model_service_main::run_model_service;

/// Explain and compare museum artifacts with offline, remote and template backends
#[derive(Parser)]
#[command(name = "artifact_explainer")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to ./config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Artifact catalog, overriding the configured one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explain one artifact
    Explain { id: String },
    /// Compare two artifacts
    Compare { id1: String, id2: String },
    /// Compare two artifacts from their images (needs a remote API key)
    CompareVisual {
        id1: String,
        id2: String,
        /// Image of the first artifact (defaults to its catalog image)
        #[arg(long)]
        image1: Option<String>,
        /// Image of the second artifact (defaults to its catalog image)
        #[arg(long)]
        image2: Option<String>,
    },
    /// Artifacts most similar to one artifact, from the trained model
    Similar {
        id: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Backend availability and trained model status
    Status,
    /// Run the model service on stdin/stdout (spawned by the client)
    #[command(hide = true)]
    ModelService,
}

fn main() {
    let cli = Cli::parse();

    if let Commands::ModelService = cli.command {
        if let Err(e) = setup_service_logging() {
            eprintln!("Failed to set up logging: {e}");
        }
        let catalog = match cli.catalog {
            Some(path) => path,
            None => match ExplainerConfig::load(cli.config.as_deref()) {
                Ok(config) => config.catalog_path,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            },
        };
        std::process::exit(run_model_service(&catalog));
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ExplainerConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(catalog) = cli.catalog {
        config.catalog_path = catalog;
    }

    if let Err(e) = setup_logging(&config.log_dir) {
        eprintln!("Failed to set up logging: {e}");
    }
    info!("[MAIN] Catalog: {}", config.catalog_path.display());

    let catalog = JsonArtifactCatalog::load(&config.catalog_path)?;
    let orchestrator = FallbackOrchestrator::from_config(&config);
    let result = dispatch(cli.command, &config, &catalog, &orchestrator);
    orchestrator.shutdown();
    result
}

fn dispatch(
    command: Commands,
    config: &ExplainerConfig,
    catalog: &JsonArtifactCatalog,
    orchestrator: &FallbackOrchestrator,
) -> anyhow::Result<()> {
    // One-shot commands give the model service its full handshake budget.
    let settle = || {
        if let Some(service) = orchestrator.service() {
            service.wait_until_settled(config.model_service.handshake_timeout());
        }
    };

    match command {
        Commands::Explain { id } => print_json(&orchestrator.explain(&lookup(catalog, &id)?)),
        Commands::Compare { id1, id2 } => {
            let (first, second) = (lookup(catalog, &id1)?, lookup(catalog, &id2)?);
            settle();
            print_json(&orchestrator.compare(&first, &second))
        }
        Commands::CompareVisual {
            id1,
            id2,
            image1,
            image2,
        } => {
            let (first, second) = (lookup(catalog, &id1)?, lookup(catalog, &id2)?);
            let image1 = image_for(&first, image1)?;
            let image2 = image_for(&second, image2)?;
            print_json(&orchestrator.compare_visual(&first, &second, &image1, &image2))
        }
        Commands::Similar { id, top_k } => {
            let artifact = lookup(catalog, &id)?;
            settle();
            print_json(&json!({
                "artifact_id": artifact.id,
                "similar": orchestrator.similar(&artifact, top_k),
            }))
        }
        Commands::Status => {
            settle();
            print_json(&json!({
                "model_status": orchestrator.model_status(),
                "service_state": orchestrator.service().map(|s| s.state()),
                "warmup_state": orchestrator.warmup().state(),
                "remote_available": orchestrator.has_remote(),
                "catalog_artifacts": catalog.len(),
            }))
        }
        Commands::ModelService => bail!("model-service is handled before dispatch"),
    }
}

fn lookup(store: &dyn ArtifactStore, id: &str) -> anyhow::Result<Artifact> {
    store.get(id).ok_or_else(|| anyhow!("unknown artifact id: {id}"))
}

fn image_for(artifact: &Artifact, explicit: Option<String>) -> anyhow::Result<String> {
    explicit
        .or_else(|| artifact.image.clone())
        .ok_or_else(|| anyhow!("artifact {} has no image; pass one explicitly", artifact.id))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
