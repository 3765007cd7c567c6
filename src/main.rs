//! tierstore command line.
//!
//! `serve` runs the hot/cold classifier against the configured storage root
//! until interrupted. The other commands operate on the same root directly
//! and exit. Every command holds the snapshot lock while it runs, so they
//! refuse to start while a server owns the store.

mod cli;
mod error;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tierstore_catalog::{Catalog, Layout, SnapshotLock};
use tierstore_config::Config;
use tierstore_executor::Executor;
use tierstore_storage::BackendHandle;
use tierstore_storage::backend::LocalBackend;
use tierstore_tiering::{HotManager, Service, Settings};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Everything the commands share, built from the configuration.
struct Stack {
    config: Config,
    backend: BackendHandle,
    catalog: Arc<Catalog>,
    layout: Layout,
    _lock: SnapshotLock,
}

impl Stack {
    async fn open(config_file: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_file).or_raise(|| ErrorKind::Config)?;
        let backend: BackendHandle =
            Arc::new(LocalBackend::new("local", &config.root).or_raise(|| ErrorKind::Storage)?);
        let lock = SnapshotLock::acquire(config.snapshot_path()).or_raise(|| ErrorKind::Catalog)?;
        debug!(lock = %lock.path().display(), "store locked");
        // A corrupt snapshot is fatal: starting empty would orphan every archive.
        let catalog = Arc::new(Catalog::open(config.snapshot_path()).await.or_raise(|| ErrorKind::Catalog)?);
        let layout = Layout::new(&config.hot_dir, &config.pack_dir, &config.url_prefix, config.archive_suffix());
        info!(root = %config.root.display(), records = catalog.len().await, "opened store");
        Ok(Self { config, backend, catalog, layout, _lock: lock })
    }

    fn service(&self) -> Service {
        Service::new(Arc::clone(&self.backend), Arc::clone(&self.catalog), self.config.compression, self.layout.clone())
    }

    fn settings(&self) -> Result<Settings> {
        Ok(Settings {
            hot_window: time::Duration::try_from(self.config.hot_window())
                .or_raise(|| ErrorKind::Argument("hot_time out of range".to_string()))?,
            scan_interval: self.config.scan_interval(),
            idle_interval: self.config.idle_interval(),
        })
    }
}

async fn serve(stack: Stack) -> Result<()> {
    let executor = Arc::new(Executor::new(stack.config.workers).or_raise(|| ErrorKind::Executor)?);
    let manager = Arc::new(HotManager::new(
        Arc::clone(&stack.backend),
        Arc::clone(&stack.catalog),
        Arc::clone(&executor),
        stack.config.compression,
        stack.layout.clone(),
        stack.settings()?,
    ));
    manager.reconcile().await.or_raise(|| ErrorKind::Tiering)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let classifier = Arc::clone(&manager).spawn(Handle::current(), shutdown_rx).or_raise(|| ErrorKind::Tiering)?;
    info!(workers = executor.size(), "serving, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "could not listen for Ctrl-C, shutting down");
    }
    info!("shutting down");
    // Receiver lives until the classifier thread exits.
    let _ = shutdown_tx.send(true);
    let drained = tokio::task::spawn_blocking(move || {
        if classifier.join().is_err() {
            error!("classifier thread panicked");
        }
        executor.shutdown();
    })
    .await;
    if drained.is_err() {
        warn!("shutdown did not complete cleanly");
    }
    stack.catalog.persist().await.or_raise(|| ErrorKind::Catalog)?;
    Ok(())
}

async fn upload(stack: Stack, file: &Path, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_raise(|| ErrorKind::Argument(format!("no usable file name in {}", file.display())))?,
    };
    let data = tokio::fs::read(file).await.or_raise(|| ErrorKind::LocalFile(file.display().to_string()))?;
    let record = stack.service().ingest(&name, &data).await.or_raise(|| ErrorKind::Tiering)?;
    println!("{}", record.url);
    Ok(())
}

async fn download(stack: Stack, url: &str, output: Option<&Path>) -> Result<()> {
    let fetched = stack.service().fetch(url).await.or_raise(|| ErrorKind::Tiering)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, &fetched.data).await.or_raise(|| ErrorKind::LocalFile(path.display().to_string()))?
        },
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&fetched.data).await.or_raise(|| ErrorKind::LocalFile("<stdout>".to_string()))?;
            stdout.flush().await.or_raise(|| ErrorKind::LocalFile("<stdout>".to_string()))?;
        },
    }
    info!(etag = %fetched.etag, size = fetched.data.len(), "downloaded");
    Ok(())
}

async fn list(stack: Stack) -> Result<()> {
    let rows = stack.service().listing().await.or_raise(|| ErrorKind::Tiering)?;
    for row in rows {
        let tier = if row.archived { "archived" } else { "hot" };
        println!("{:<8} {:>7}  {}  {}  {}", tier, row.human_size(), row.last_modified(), row.file_name, row.url);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let stack = Stack::open(cli.config.as_deref()).await?;
    match cli.command {
        Command::Serve => serve(stack).await,
        Command::Upload { file, name } => upload(stack, &file, name).await,
        Command::Download { url, output } => download(stack, &url, output.as_deref()).await,
        Command::List => list(stack).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}
