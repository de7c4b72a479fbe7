//! `snapsync` - run and inspect snapshot sync sessions from the command line.
//!
//! `snapsync run` keeps a snapshot-count session synchronized against a
//! Lookback endpoint and prints every render event to stdout as a JSON line.
//! Logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use snapsync::logging::setup::{init_logging, LoggingConfig};
use snapsync::prelude::*;
use snapsync::source::{LookbackConfig, LookbackSource, DEFAULT_PAGE_SIZE};
use snapsync_cli::{resolve_api_key, write_json_line, ScopeArgs, StoreArgs};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "snapsync", author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize a session until it stops or is interrupted
    Run {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Lookback API base URL
        #[arg(long)]
        endpoint: String,

        /// API key sent as ZSESSIONID (defaults to $SNAPSYNC_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Snapshots requested per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Print the cache key a session would use
    Key {
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove the cached state of a session
    Invalidate {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        store: StoreArgs,
    },
    /// List every key in a store
    List {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            scope,
            store,
            endpoint,
            api_key,
            page_size,
            timeout_secs,
        } => {
            let scope = scope.build()?;
            let log = LogConfig::from_flags(scope.config().debug(), scope.config().trace());
            init_logging(LoggingConfig::for_session(&log).with_json_format(cli.json_logs))
                .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

            let mut lookback = LookbackConfig::new(endpoint)
                .with_page_size(page_size)
                .with_timeout(Duration::from_secs(timeout_secs));
            if let Some(key) = resolve_api_key(api_key) {
                lookback = lookback.with_api_key(key);
            }

            let source = LookbackSource::new(lookback, *scope.project())?;
            run(scope, store, source).await
        }
        Command::Key { scope } => {
            println!("{}", derive_key(&scope.build()?).as_str());
            Ok(())
        }
        Command::Invalidate { scope, store } => {
            let key = derive_key(&scope.build()?);
            store.open()?.remove(&key).await?;
            println!("{}", key.as_str());
            Ok(())
        }
        Command::List { store } => {
            for key in store.open()?.keys().await? {
                println!("{}", key.as_str());
            }
            Ok(())
        }
    }
}

async fn run(scope: SyncScope, store: StoreArgs, source: LookbackSource) -> Result<()> {
    let sink = FnRenderSink(|event: &RenderEvent<CountView>| {
        if let Err(e) = write_json_line(&mut std::io::stdout().lock(), event) {
            warn!(error = %e, "Failed to write render event");
        }
    });

    let session = SyncOrchestrator::<SnapshotCountCalculator>::new(
        scope,
        store.open()?,
        Arc::new(source),
        sink,
    );
    info!(key = %session.key().as_str(), "Starting sync session");

    let handle = session.handle();
    let mut task = tokio::spawn(session.run());

    let result = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            if let Err(e) = handle.shutdown().await {
                warn!(error = %e, "Session ended before shutdown");
            }
            task.await?
        }
    };

    match result {
        Ok(stats) => {
            info!(
                pages_merged = stats.pages_merged,
                snapshots_merged = stats.snapshots_merged,
                fetch_failures = stats.fetch_failures,
                "Sync session finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Sync session failed");
            Err(e.into())
        }
    }
}
