//! `hoard`: mirror a remote rsync tree into an object store, keeping every
//! superseded version in a content-addressed archive.
mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use hoard_config::{Config, StorageConfig};
use hoard_remote::{FilteredScan, RemoteHandle, RsyncRemote, RunnerHandle, SystemRunner};
use hoard_storage::BackendHandle;
use hoard_storage::backend::{LocalBackend, S3Backend};
use hoard_sync::{Archiver, Detector, Executor, Orchestrator};
use hoard_versions::{Database, Repository, StoreHandle, VersionRecord, VersionStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hoard", version)]
#[command(about = "Mirror a remote file tree into a versioned, content-addressed archive", long_about = None)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a sync cycle
    Run {
        /// Keep running cycles on the configured interval until interrupted
        #[arg(long)]
        repeat: bool,
    },
    /// Show every recorded version of a remote path
    History {
        /// Absolute remote path, e.g. /pub/data/a.nc
        path: String,
    },
    /// Show the newest version of every path under a prefix
    Latest {
        /// Absolute remote path prefix; everything when omitted
        prefix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = match cli.verbose {
        0 => "hoard=info",
        1 => "hoard=debug",
        _ => "hoard=trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "hoard failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Run { repeat } => sync(&config, repeat || config.schedule.repeat).await,
        Command::History { path } => {
            let db = open_database(&config).await?;
            let records = Repository::from(&db).history(&path).await.or_raise(|| ErrorKind::Query)?;
            print_records(&records);
            db.close().await;
            Ok(ExitCode::SUCCESS)
        },
        Command::Latest { prefix } => {
            let db = open_database(&config).await?;
            let records = Repository::from(&db).latest_per_path(prefix.as_deref()).await.or_raise(|| ErrorKind::Query)?;
            print_records(&records);
            db.close().await;
            Ok(ExitCode::SUCCESS)
        },
    }
}

async fn sync(config: &Config, repeat: bool) -> Result<ExitCode> {
    let db = open_database(config).await?;
    let storage = open_storage(config).await?;
    let versions: StoreHandle = Arc::new(Repository::from(&db));
    let runner: RunnerHandle = Arc::new(SystemRunner);
    let remote: RemoteHandle = Arc::new(RsyncRemote::new(&config.remote.server, &config.remote.rsync, runner.clone()));
    let scanner = FilteredScan::new(&config.remote.server, &config.remote.rsync, runner.clone());
    let archiver = Archiver::new(storage.clone(), versions.clone(), runner)
        .with_threshold(config.archive.large_object_threshold)
        .with_bulk_move(config.archive.bulk_move.clone());
    let staging = config.staging_path().or_raise(|| ErrorKind::Config)?;
    let detector = Detector::new(remote.clone(), scanner, storage.clone(), versions.clone());
    let executor = Executor::new(remote, storage, versions.clone(), archiver, staging);
    let orchestrator = Orchestrator::new(versions, detector, executor, config.folders.clone());

    let code = match repeat {
        true => {
            let interval = config.schedule.interval();
            tracing::info!(?interval, "running repeatedly; press Ctrl-C to stop after the current cycle");
            orchestrator.run_repeating(interval, shutdown_signal()).await;
            ExitCode::SUCCESS
        },
        false => match orchestrator.run_cycle().await.is_aborted() {
            true => ExitCode::FAILURE,
            false => ExitCode::SUCCESS,
        },
    };
    db.close().await;
    Ok(code)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the loop only ends when the process is killed.
        tracing::warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    let path = config.database_path().or_raise(|| ErrorKind::Config)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Database)?;
    }
    tracing::debug!(path = %path.display(), "opening version database");
    Database::connect(&path).await.or_raise(|| ErrorKind::Database)
}

async fn open_storage(config: &Config) -> Result<BackendHandle> {
    let backend: BackendHandle = match &config.storage {
        StorageConfig::Local { local } => Arc::new(LocalBackend::new("local", local).or_raise(|| ErrorKind::Storage)?),
        StorageConfig::S3(s3) => Arc::new(
            S3Backend::new(
                "s3",
                &s3.bucket,
                s3.prefix.clone(),
                &s3.region,
                s3.endpoint.clone(),
                &s3.key_id,
                &s3.key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?,
        ),
    };
    tracing::debug!(backend = backend.name(), "opened object store");
    Ok(backend)
}

fn print_records(records: &[VersionRecord]) {
    for record in records {
        println!(
            "{}\tv{}\t{}\t{}",
            record.path,
            record.version,
            record.modified.as_deref().unwrap_or("-"),
            record.archive_key.as_deref().unwrap_or("live"),
        );
    }
}
