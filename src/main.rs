//! ProductLens - product photo text and attribute extraction
//!
//! Command-line front end. Results are printed to stdout as JSON; logs go
//! to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use product_lens::app::ProductProcessor;
use product_lens::attributes::AttributeExtractor;
use product_lens::background::{self, RemovalMethod};
use product_lens::config::{load_config, AppConfig};
use product_lens::storage;
use product_lens::vision::{ModelManager, TextExtractor};

/// ProductLens - extract text and attributes from product images
#[derive(Parser, Debug)]
#[command(name = "product-lens")]
#[command(about = "Extract text, remove backgrounds and infer attributes from product images")]
struct Args {
    /// Config file (defaults to config.toml in the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Never download models
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every text pass over an image
    Text { image: PathBuf },
    /// Full attribute extraction for a product
    Attributes {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Stored image whose extracted text is folded into the description
        #[arg(long)]
        image_id: Option<i64>,
    },
    /// Pattern-only attribute extraction
    Basic { text: String },
    /// Store an image, extract its text and remove its background
    Process { image: PathBuf },
    /// Remove the background of an image
    RemoveBg {
        image: PathBuf,
        /// segmentation, color-key or auto (defaults to the configured method)
        #[arg(long)]
        method: Option<RemovalMethod>,
    },
    /// Most recently processed images
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let mut config = resolve_config(args.config.as_deref())?;
    config.general.offline |= args.offline;

    match args.command {
        Command::Text { image } => {
            let models = models_for(&config)?;
            let bundle = TextExtractor::from_settings(&config.vision, models).extract_all(&image)?;
            print_json(&bundle)
        }
        Command::Attributes {
            title,
            description,
            image_id,
        } => {
            if image_id.is_some() {
                let processor = ProductProcessor::from_config(&config)?;
                print_json(&processor.extract_attributes(&title, &description, image_id)?)
            } else {
                let extractor = AttributeExtractor::from_settings(&config.attributes)?;
                print_json(&extractor.extract_all(&title, &description, None))
            }
        }
        Command::Basic { text } => {
            let extractor = AttributeExtractor::from_settings(&config.attributes)?;
            print_json(&extractor.extract_basic(&text))
        }
        Command::Process { image } => {
            let processor = ProductProcessor::from_config(&config)?;
            print_json(&processor.process_image(&image)?)
        }
        Command::RemoveBg { image, method } => {
            let method = method.unwrap_or_else(|| config.background.method.into());
            info!("Removing background with {}", method);
            let remover = background::build_remover(method, &config.background, models_for(&config)?);
            let output = remover.remove(&image)?;
            print_json(&serde_json::json!({ "method": method.as_str(), "output": output }))
        }
        Command::History { limit } => {
            let processor = ProductProcessor::from_config(&config)?;
            print_json(&processor.history(limit)?)
        }
    }
}

/// Explicit path must exist; the default path is optional
fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    let default_path = storage::get_config_dir()?.join("config.toml");
    if default_path.exists() {
        load_config(&default_path)
    } else {
        debug!("No config at {:?}, using defaults", default_path);
        Ok(AppConfig::default())
    }
}

fn models_for(config: &AppConfig) -> Result<ModelManager> {
    ModelManager::from_settings(config.vision.models_dir.as_deref(), config.general.offline)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
