//! Trapper packaging tool
//!
//! Builds camera-trap data packages ready to be uploaded to a Trapper server.
//!
//! # Commands
//!
//! - `build`: scan the selected collections and write the manifest, the
//!   archive and the audit log into the output directory
//! - `template`: write `deployments_metadata.csv` describing every deployment
//! - `validate`: check the local deployments against the Trapper project
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. `config/packager.{toml,yaml,json}`
//! 2. The file given with `--config`
//! 3. Environment variables (prefixed with PACKAGER__)
//!
//! See `config.rs` for detailed configuration options.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trapper_packager::config::LoggingConfig;
use trapper_packager::deployments::TEMPLATE_FILE_NAME;
use trapper_packager::{
    deployments_template, validate_deployments, write_template, PackageBuilder, PackageProgress,
    PackageRequest, PackagerConfig, ProgressSender,
};
use trapper_remote::{TrapperApi, TrapperClient, DEFAULT_PROJECT_ROLES};

/// Capacity of the progress channel between the builder and the printer
const PROGRESS_BUFFER: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "trapper-package", version, about = "Build camera-trap data packages for Trapper")]
struct Cli {
    /// Configuration file layered over config/packager
    #[arg(short, long, env = "PACKAGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the manifest, the archive and the audit log
    Build,
    /// Write the deployments metadata template
    Template,
    /// Check local deployments against the Trapper project
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = PackagerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "trapper-package",
        version = env!("CARGO_PKG_VERSION"),
        project = %config.package.project,
        "Starting packaging tool"
    );

    // Validate configuration
    config.validate()?;

    let result = match cli.command {
        Command::Build => build(&config).await,
        Command::Template => template(&config).await,
        Command::Validate => validate(&config).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Packaging tool failed");
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
        .add_directive(format!("trapper_packager={}", level).parse()?)
        .add_directive(format!("trapper_remote={}", level).parse()?)
        .add_directive(format!("audit={}", level).parse()?)
        .add_directive("reqwest=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Validate and scan on a blocking worker
async fn prepare(config: &PackagerConfig) -> anyhow::Result<PackageBuilder> {
    let request = PackageRequest::from_config(config);
    let builder = tokio::task::spawn_blocking(move || PackageBuilder::new(request))
        .await
        .context("Scan task panicked")??;
    Ok(builder)
}

async fn build(config: &PackagerConfig) -> anyhow::Result<()> {
    let builder = prepare(config).await?;
    info!(files = builder.total_files(), "Building package");

    let (tx, mut rx) = mpsc::channel::<PackageProgress>(PROGRESS_BUFFER);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!(
                progress = format!("{}/{}", event.index + 1, event.total),
                file = %event.label,
                "Archiving"
            );
        }
    });

    let sender = ProgressSender::new(tx);
    let files = tokio::task::spawn_blocking(move || builder.run(&sender))
        .await
        .context("Build task panicked")??;
    printer.await.context("Progress printer panicked")?;

    println!("Your package has been successfully generated:");
    println!("  manifest: {}", files.manifest.display());
    println!("  archive:  {}", files.archive.display());
    println!("  log:      {}", files.log.display());
    Ok(())
}

async fn template(config: &PackagerConfig) -> anyhow::Result<()> {
    let builder = prepare(config).await?;
    let rows = deployments_template(builder.manifest());
    let path = config.package.output_path.join(TEMPLATE_FILE_NAME);

    let target = path.clone();
    tokio::task::spawn_blocking(move || write_template(&target, &rows))
        .await
        .context("Template task panicked")??;

    println!("The template was successfully generated: {}", path.display());
    Ok(())
}

async fn validate(config: &PackagerConfig) -> anyhow::Result<()> {
    let remote = &config.remote;
    let client = TrapperClient::new(remote.clone())?;

    let status = client.authenticate(&remote.login, &remote.password).await?;
    if !status.is_success() {
        anyhow::bail!("Trapper login failed for {} (code {})", remote.login, status.code);
    }

    let project_id = match remote.project_id {
        Some(id) => id,
        None => client
            .list_projects(&config.package.project, DEFAULT_PROJECT_ROLES)
            .await?
            .into_iter()
            .find(|p| p.acronym == config.package.project)
            .map(|p| p.id)
            .with_context(|| {
                format!(
                    "No Trapper project {} on which you are Admin or Collaborator",
                    config.package.project
                )
            })?,
    };

    let remote_ids: Vec<String> = client
        .list_remote_deployments(project_id)
        .await?
        .into_iter()
        .map(|d| d.deployment_id)
        .collect();
    info!(project_id, deployments = remote_ids.len(), "Fetched Trapper deployments");

    let request = PackageRequest::from_config(config);
    tokio::task::spawn_blocking(move || {
        validate_deployments(
            &request.media_root,
            &request.collections,
            &remote_ids,
            &request.output_path,
        )
    })
    .await
    .context("Validation task panicked")??;

    println!("Your data structure was successfully validated!");
    Ok(())
}
