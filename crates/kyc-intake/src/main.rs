//! kyc-intake: command-line front end for the identity document pipeline.
//!
//! Every subcommand prints its result as pretty JSON on stdout and exits
//! non-zero when the operation was rejected or failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kyc_core::{IntakeConfig, UploadCandidate};
use kyc_intake::DocumentIntake;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "kyc-intake")]
#[command(author, version, about = "Identity document intake and field extraction")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: $KYC_CONFIG, ./kyc-intake.toml, then KYC_* env vars)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and store a document
    Upload {
        /// File to upload
        file: PathBuf,

        /// Verified subject (customer) id
        #[arg(short, long)]
        subject: String,

        /// Document category, e.g. identity or address
        #[arg(short = 'g', long)]
        category: String,

        /// Correlation id for log tracing
        #[arg(long)]
        request_id: Option<Uuid>,
    },

    /// Extract fields from a stored document
    Extract {
        /// Stored path relative to the storage root
        stored_path: String,

        /// national_id, passport, drivers_license or proof_of_address
        #[arg(short = 't', long)]
        document_type: String,
    },

    /// Upload and extract in one run
    Process {
        file: PathBuf,

        #[arg(short, long)]
        subject: String,

        #[arg(short = 'g', long)]
        category: String,

        #[arg(short = 't', long)]
        document_type: String,

        #[arg(long)]
        request_id: Option<Uuid>,
    },

    /// Move a stored document into the archive
    Archive { stored_path: String },

    /// Mark an uploaded document as processed
    Processed { stored_path: String },

    /// Delete a stored document (archives unless --hard)
    Delete {
        stored_path: String,

        /// Remove the file instead of archiving it
        #[arg(long)]
        hard: bool,
    },

    /// Show the record for a stored document
    Info { stored_path: String },

    /// Active storage usage and upload limits
    Stats,

    /// Check storage and recognition backend availability
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "kyc_intake=info,kyc_ocr=info,kyc_store=info")
///
/// Console logs go to stderr so stdout stays valid JSON.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "kyc_intake=info,kyc_ocr=info,kyc_store=info,kyc_core=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("kyc-intake.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<IntakeConfig> {
    let config = match path {
        Some(path) => IntakeConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => IntakeConfig::load().context("loading config")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs one subcommand; `Ok(false)` means the operation completed but was
/// rejected or failed.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = Arc::new(load_config(cli.config)?);
    info!(
        storage_root = %config.storage.root.display(),
        max_upload_bytes = config.upload.max_size_bytes,
        "Configuration loaded"
    );
    let intake = DocumentIntake::from_config(config);
    intake.initialize().await.context("preparing storage")?;

    match cli.command {
        Commands::Upload {
            file,
            subject,
            category,
            request_id,
        } => {
            let candidate = open_candidate(&file).await?;
            match intake.upload(candidate, &subject, &category, request_id).await {
                Ok(document) => {
                    print_json(&document)?;
                    Ok(true)
                }
                Err(e) if e.is_client_error() => {
                    print_json(&json!({ "rejected": e.to_string() }))?;
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Extract {
            stored_path,
            document_type,
        } => {
            let result = intake.extract(&stored_path, &document_type).await;
            print_json(&result)?;
            Ok(result.is_completed())
        }
        Commands::Process {
            file,
            subject,
            category,
            document_type,
            request_id,
        } => {
            let candidate = open_candidate(&file).await?;
            let outcome = intake
                .process(candidate, &subject, &category, &document_type, request_id)
                .await;
            print_json(&outcome)?;
            Ok(outcome.is_completed())
        }
        Commands::Archive { stored_path } => {
            let archived = intake.archive(&stored_path).await;
            print_json(&json!({ "stored_path": stored_path, "archived": archived }))?;
            Ok(archived)
        }
        Commands::Processed { stored_path } => {
            let moved = intake.move_to_processed(&stored_path).await;
            print_json(&json!({ "stored_path": stored_path, "processed_path": moved }))?;
            Ok(moved.is_some())
        }
        Commands::Delete { stored_path, hard } => {
            let deleted = intake.delete(&stored_path, !hard).await;
            print_json(&json!({ "stored_path": stored_path, "deleted": deleted, "hard": hard }))?;
            Ok(deleted)
        }
        Commands::Info { stored_path } => match intake.info(&stored_path).await {
            Some(document) => {
                print_json(&document)?;
                Ok(true)
            }
            None => {
                print_json(&json!({ "stored_path": stored_path, "found": false }))?;
                Ok(false)
            }
        },
        Commands::Stats => {
            print_json(&intake.storage_stats().await)?;
            Ok(true)
        }
        Commands::Health => {
            let report = intake.health().await;
            print_json(&report)?;
            Ok(report.is_healthy())
        }
    }
}

async fn open_candidate(path: &std::path::Path) -> anyhow::Result<UploadCandidate> {
    UploadCandidate::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}
