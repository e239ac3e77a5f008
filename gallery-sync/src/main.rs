mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gallery_store::BucketClient;
use gallery_sync::config::{RemoteCredentials, SyncConfig};
use gallery_sync::sync::local_previews::generate_local_previews;
use gallery_sync::sync::orchestrator::{SyncError, SyncOrchestrator};
use gallery_sync::sync::pool::WorkerPool;
use gallery_sync::sync::preview::PreviewDeriver;
use gallery_sync::sync::remote::BucketStore;
use gallery_sync::sync::scanner::{FileScanner, default_roots};
use gallery_sync::sync::state::StateStore;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let mut config = SyncConfig::from_env().context("invalid sync configuration")?;
    if let Some(site_dir) = &cli.site_dir {
        config = config.with_site_dir(site_dir);
    }
    if let Some(concurrency) = cli.concurrency {
        config = config.with_concurrency(concurrency);
    }

    let failed = match cli.effective_command() {
        Command::Sync => run_sync(&config).await?,
        Command::Previews => run_previews(&config).await?,
    };
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_sync(config: &SyncConfig) -> anyhow::Result<bool> {
    let credentials =
        RemoteCredentials::from_env().context("bucket credentials are not configured")?;
    let client = BucketClient::new(&credentials.to_bucket_credentials(), config.bucket.clone())
        .context("failed to build bucket client")?;
    tracing::info!(
        bucket = %config.bucket,
        site = %config.site_dir.display(),
        workers = config.concurrency,
        "starting sync"
    );

    let orchestrator = SyncOrchestrator::new(
        FileScanner::new(config.content_dir(), default_roots()),
        StateStore::new(config.state_file()),
        config.index_file(),
        Arc::new(BucketStore::new(client)),
        config.public_url.clone(),
    )
    .with_catalog(config.catalog_file())
    .with_key_scheme(config.key_scheme)
    .with_metadata_source(config.metadata_source)
    .with_concurrency(config.concurrency);

    match orchestrator.run_pass().await {
        Ok(summary) => {
            println!("{summary}");
            Ok(summary.failed())
        }
        Err(SyncError::Halted { source, summary }) => {
            println!("{summary}");
            tracing::error!(error = %source, "sync halted; state left untouched");
            Ok(true)
        }
        Err(err) => Err(anyhow::Error::new(err).context("sync pass failed")),
    }
}

async fn run_previews(config: &SyncConfig) -> anyhow::Result<bool> {
    let scanner = FileScanner::new(config.content_dir(), default_roots());
    let report = generate_local_previews(
        &scanner,
        WorkerPool::new(config.concurrency),
        PreviewDeriver::new(),
    )
    .await
    .context("preview generation failed")?;
    println!("{report}");
    Ok(report.failed())
}
