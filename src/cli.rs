///
/// This module implements the CLI of code-bundle: command parsing, wiring the configured
/// collaborators into a [`Pipeline`], and the two entrypoints.
///
/// All job logic (extraction, aggregation, rendering, merging) lives in `code-bundle-core`.
/// This module is strictly glue.
///
/// ## Commands
/// - `serve`: run the HTTP upload service.
/// - `bundle`: run one job offline on a local archive and write the PDF.
///
/// For programmatic or integration use, call [`run`] with a constructed [`Cli`].
use crate::load_config::{load_config, CliConfig};
use crate::server::{build_router, start_server, AppState};
use crate::upload::DriveClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use code_bundle_core::aggregate::{Aggregator, HighlightAssets};
use code_bundle_core::contract::RemoteStore;
use code_bundle_core::extract::ZipExtractor;
use code_bundle_core::merge::LopdfMerger;
use code_bundle_core::pipeline::{JobServices, Pipeline, RemoteUpload};
use code_bundle_core::render::renderer_from_config;
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for code-bundle: turn a zipped source tree into one printable PDF.
#[derive(Parser)]
#[clap(
    name = "code-bundle",
    version,
    about = "Bundle the sources and PDFs of an uploaded archive into one printable PDF"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP upload service
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Bundle one local archive and write the resulting PDF
    Bundle {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// ZIP archive to bundle
        #[clap(long)]
        archive: PathBuf,
        /// Team name, used for the PDF's file name
        #[clap(long)]
        team: String,
        /// Where to write the PDF
        #[clap(long)]
        out: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(config)?;
            let pipeline = build_pipeline(&config)?;
            let listener = tokio::net::TcpListener::bind(&config.server.bind)
                .await
                .with_context(|| format!("Failed to bind {}", config.server.bind))?;
            tracing::info!(command = "serve", bind = %config.server.bind, "Starting upload service");
            let router = build_router(AppState::new(pipeline), &config.server);
            start_server(listener, router).await?;
            Ok(())
        }
        Commands::Bundle {
            config,
            archive,
            team,
            out,
        } => {
            let config = load_config(config)?;
            let pipeline = build_pipeline(&config)?;
            tracing::info!(command = "bundle", archive = %archive.display(), team = %team, "Bundling archive");
            let report = match pipeline.run_archive(&team, &archive).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(command = "bundle", error = %e, "Bundling failed");
                    return Err(anyhow::Error::new(e));
                }
            };
            tokio::fs::write(&out, &report.pdf)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            tracing::info!(command = "bundle", ?report, out = %out.display(), "Bundle complete");
            // The process exits right after, so wait for the remote copy here.
            match report.remote.outcome().await {
                RemoteUpload::Failed(reason) => {
                    tracing::warn!(command = "bundle", reason = %reason, "PDF written locally only")
                }
                RemoteUpload::Stored(stored) => {
                    tracing::info!(command = "bundle", id = %stored.id, "Remote copy stored")
                }
                RemoteUpload::Disabled => {}
            }
            Ok(())
        }
    }
}

/// Wire the configured collaborators into a pipeline.
pub fn build_pipeline(config: &CliConfig) -> Result<Pipeline> {
    let assets = HighlightAssets::load(&config.aggregate.assets_dir);
    let aggregator = Aggregator::new(config.aggregate.clone(), assets);

    let store: Option<Arc<dyn RemoteStore>> = match &config.drive {
        Some(settings) => Some(Arc::new(
            DriveClient::from_settings(settings).context("Failed to construct Google Drive client")?,
        )),
        None => None,
    };

    let services = JobServices {
        extractor: Arc::new(ZipExtractor::new()),
        renderer: renderer_from_config(&config.render),
        merger: Arc::new(LopdfMerger::new()),
        store,
    };
    Ok(Pipeline::new(config.storage.clone(), aggregator, services))
}
