//! Trapper upload tool
//!
//! Sends data packages built by `trapper-package` to the Trapper FTP server.
//!
//! # Commands
//!
//! - `check`: verify the FTP login
//! - `send FILES...`: upload the manifest and the archive, then ask Trapper
//!   to process them; Ctrl+C stops the upload after the current block
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. `config/uploader.{toml,yaml,json}`
//! 2. The file given with `--config`
//! 3. Environment variables (prefixed with UPLOADER__)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trapper_remote::TrapperClient;
use trapper_uploader::config::LoggingConfig;
use trapper_uploader::{
    ProgressSender, SuppaftpConnector, UploadOutcome, UploadProgress, UploadRequest, Uploader,
    UploaderConfig,
};

#[derive(Debug, Parser)]
#[command(name = "trapper-upload", version, about = "Upload camera-trap data packages to Trapper")]
struct Cli {
    /// Configuration file layered over config/uploader
    #[arg(short, long, env = "UPLOADER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify the FTP connection settings
    Check,
    /// Upload package files in the given order
    Send {
        /// Continue partial files already on the server
        #[arg(long)]
        resume: bool,

        /// Do not ask Trapper to process the package
        #[arg(long)]
        no_process: bool,

        /// Ask Trapper to delete the archive once processed
        #[arg(long)]
        remove_zip: bool,

        /// Package files, usually the manifest then the archive
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = UploaderConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "trapper-upload",
        version = env!("CARGO_PKG_VERSION"),
        "Starting upload tool"
    );

    // Validate configuration
    config.validate()?;

    let connector = SuppaftpConnector::new(config.ftp.tls, config.verify_tls())
        .context("Failed to set up FTP client")?;
    let uploader = Uploader::from_config(&config, Arc::new(connector));

    let result = match cli.command {
        Command::Check => check(&uploader).await,
        Command::Send {
            resume,
            no_process,
            remove_zip,
            files,
        } => {
            let request = UploadRequest {
                files,
                resume,
                trigger_processing: config.upload.trigger_processing && !no_process,
                remove_zip: remove_zip || config.upload.remove_zip,
            };
            send(&config, uploader, request).await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "Upload tool failed");
    }
    result
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("trapper_uploader={}", level).parse()?)
        .add_directive(format!("trapper_remote={}", level).parse()?)
        .add_directive("suppaftp=warn".parse()?)
        .add_directive("rustls=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

async fn check(uploader: &Uploader) -> anyhow::Result<()> {
    if uploader.check().await? {
        println!("FTP connection successful!");
        Ok(())
    } else {
        anyhow::bail!("No FTP connection. Please, check your settings.")
    }
}

async fn send(config: &UploaderConfig, uploader: Uploader, request: UploadRequest) -> anyhow::Result<()> {
    let uploader = if request.trigger_processing {
        let client = TrapperClient::new(config.remote.clone())?;
        uploader.with_api(Arc::new(client))
    } else {
        uploader
    };

    // Stop after the current block on Ctrl+C
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            warn!("Stopping the upload...");
            cancel.cancel();
        }
    });

    let (tx, rx) = mpsc::channel::<UploadProgress>(config.upload.progress_buffer);
    let printer = tokio::spawn(print_progress(rx));

    let outcome = uploader
        .upload(request, cancel, ProgressSender::new(tx))
        .await;
    printer.await.context("Progress printer panicked")?;

    let stats = uploader.stats();
    info!(
        connects = stats.connects,
        bytes_sent = stats.bytes_sent,
        files_stored = stats.files_stored,
        "FTP session stats"
    );

    match outcome? {
        UploadOutcome::Stopped => anyhow::bail!("{}", UploadOutcome::Stopped),
        outcome => {
            println!("{outcome}");
            Ok(())
        }
    }
}

/// Log each whole percent reached per file
async fn print_progress(mut rx: mpsc::Receiver<UploadProgress>) {
    let mut last: Option<(String, u64)> = None;

    while let Some(event) = rx.recv().await {
        let percent = if event.total_bytes == 0 {
            100
        } else {
            event.uploaded_bytes.min(event.total_bytes) * 100 / event.total_bytes
        };

        let current = (event.file_name.clone(), percent);
        if last.as_ref() != Some(&current) {
            info!(
                file = %event.file_name,
                uploaded = event.uploaded_bytes,
                total = event.total_bytes,
                "{}%",
                percent
            );
            last = Some(current);
        }
    }
}
