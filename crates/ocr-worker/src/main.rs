use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ocr_cascade::{latex, CascadeController, Modality, QualityTier};
use ocr_worker::{BatchRunner, Manifest, WorkerConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Resolve photographed problem blocks through the OCR cascade")]
struct Cli {
    /// Worker configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recognize one text block
    Text {
        image: PathBuf,
        #[arg(short, long, default_value = "B")]
        quality: QualityTier,
    },
    /// Recognize one formula block
    Formula {
        image: PathBuf,
        #[arg(short, long, default_value = "B")]
        quality: QualityTier,
    },
    /// Resolve every block listed in a JSON manifest
    Batch { manifest: PathBuf },
    /// Run the LaTeX compilability check on a string
    CheckLatex { text: String },
    /// List the engines that initialized successfully
    Engines,
}

#[derive(Serialize)]
struct LatexCheck<'a> {
    text: &'a str,
    is_compilable: bool,
    estimated_confidence: f64,
}

#[derive(Serialize)]
struct EngineListing {
    registered: Vec<String>,
    text: Vec<String>,
    formula: Vec<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

async fn build_controller(config: &WorkerConfig) -> Result<CascadeController> {
    let registry = config.build_registry().await?;
    config.controller(registry)
}

async fn resolve_single(
    config: &WorkerConfig,
    modality: Modality,
    image: &Path,
    quality: QualityTier,
) -> Result<()> {
    let controller = build_controller(config).await?;
    info!(%modality, image = %image.display(), %quality, "Resolving single block");
    let result = controller.resolve_block(modality, image, quality).await;
    controller.registry().cleanup_all().await;
    print_json(&result)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocr_cascade=info,ocr_worker=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::CheckLatex { text } => print_json(&LatexCheck {
            text: &text,
            is_compilable: latex::is_compilable(&text),
            estimated_confidence: latex::estimate_confidence(&text),
        }),
        Command::Text { image, quality } => {
            let config = WorkerConfig::load(config_path)?;
            resolve_single(&config, Modality::Text, &image, quality).await
        }
        Command::Formula { image, quality } => {
            let config = WorkerConfig::load(config_path)?;
            resolve_single(&config, Modality::Formula, &image, quality).await
        }
        Command::Batch { manifest } => {
            let config = WorkerConfig::load(config_path)?;
            let manifest = Manifest::load(&manifest)?;
            let controller = Arc::new(build_controller(&config).await?);
            let runner = BatchRunner::new(Arc::clone(&controller), config.max_concurrent_blocks);
            let report = runner.run(manifest).await;
            controller.registry().cleanup_all().await;
            print_json(&report)
        }
        Command::Engines => {
            let config = WorkerConfig::load(config_path)?;
            let registry = config.build_registry().await?;
            let available = |modality: Modality| -> Vec<String> {
                config
                    .cascade
                    .engines
                    .for_modality(modality)
                    .engine_names()
                    .filter(|name| registry.contains(name))
                    .map(str::to_string)
                    .collect()
            };
            let listing = EngineListing {
                registered: registry.names(),
                text: available(Modality::Text),
                formula: available(Modality::Formula),
            };
            registry.cleanup_all().await;
            print_json(&listing)
        }
    }
}
