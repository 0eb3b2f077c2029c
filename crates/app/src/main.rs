use anyhow::Context;
use clap::{Parser, Subcommand};
use nbbang::{AppConfig, ReceiptService, Upload};
use nbbang_core::{AllocationRequest, SettlementId};
use nbbang_ocr::OcrBackend;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "nbbang",
    version,
    about = "Split shared receipts between participants",
    long_about = "Read receipt images into line items, then split the total equally or item by item among participants."
)]
struct Cli {
    #[arg(long, value_name = "PATH", help = "Config file (defaults to nbbang.toml in the platform config directory)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store receipt images for later analysis
    Ingest {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Re-read every stored receipt and replace all extracted items
    Analyze,
    /// Add a participant to the roster
    Join { name: String },
    /// List the roster
    Members,
    /// Compute and save a settlement from a JSON request file
    Settle {
        #[arg(value_name = "REQUEST_JSON")]
        request: PathBuf,
    },
    /// Print the export view of a saved settlement
    Report { id: i64 },
    /// Delete all receipts, items, participants and settlements
    Clear,
}

fn recognizer(config: &AppConfig) -> Box<dyn OcrBackend> {
    #[cfg(feature = "tesseract")]
    {
        Box::new(nbbang_ocr::TesseractRecognizer::new(
            config.ocr.tessdata_path.clone(),
            &config.ocr.language,
        ))
    }
    #[cfg(not(feature = "tesseract"))]
    {
        tracing::warn!(
            "Built without the `tesseract` feature; receipts will not be recognized (language {})",
            config.ocr.language
        );
        Box::new(nbbang_ocr::MockRecognizer::new(""))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let service = ReceiptService::open(&config, recognizer(&config))
        .await
        .context("Failed to open data directory")?;

    match cli.command {
        Command::Ingest { files } => {
            let uploads = files
                .iter()
                .map(|path| Upload::from_path(path).with_context(|| format!("Failed to read {}", path.display())))
                .collect::<anyhow::Result<Vec<_>>>()?;
            print_json(&service.ingest(uploads).await?)?;
        }
        Command::Analyze => print_json(&service.analyze().await?)?,
        Command::Join { name } => print_json(&service.join_participant(&name).await?)?,
        Command::Members => print_json(&service.participants().await?)?,
        Command::Settle { request } => {
            let json = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read {}", request.display()))?;
            let request = AllocationRequest::from_json(&json)?;
            print_json(&service.allocate(&request).await?)?;
        }
        Command::Report { id } => print_json(&service.settlement_report(SettlementId(id)).await?)?,
        Command::Clear => service.clear_all().await?,
    }

    Ok(())
}
