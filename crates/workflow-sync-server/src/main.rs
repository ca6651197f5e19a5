//! workflow-sync-server: keeps text, form and graphical clients of workflow
//! files in sync over a JSON-lines protocol on stdin/stdout.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workflow_sync::SyncConfig;
use workflow_sync_server::{FileWatcher, NativeFs, WorkflowServer, serve};

#[derive(Parser, Debug)]
#[command(name = "workflow-sync-server")]
#[command(about = "Workflow document sync server")]
struct Args {
    /// Directory relative document paths resolve against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Don't watch the root for external edits
    #[arg(long)]
    no_watch: bool,

    /// Quiet period for file watcher events
    #[arg(long, default_value_t = 200)]
    debounce_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr
    let default_filter = if args.verbose {
        "debug,workflow_sync=debug,workflow_sync_server=debug"
    } else {
        "info,workflow_sync=info,workflow_sync_server=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = SyncConfig::from_env()?;
    info!("Starting workflow-sync-server");
    info!("Root: {:?}", args.root);
    info!(
        "Sync timeout {:?}, debounce {:?}, policy {:?}",
        config.sync_timeout, config.debounce_delay, config.default_conflict_resolution
    );

    let (server, actions) = WorkflowServer::new(NativeFs::new(args.root.clone()), config);

    let file_events = if args.no_watch {
        None
    } else {
        let mut watcher = FileWatcher::new(args.root.clone(), Duration::from_millis(args.debounce_ms))?;
        info!("Watching {}", watcher.root().display());

        // The task owns the watcher, keeping it alive for the server's lifetime
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = watcher.event_rx().recv().await {
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });
        Some(event_rx)
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(server, actions, file_events, stdin, stdout).await?;

    info!("Shutting down");
    Ok(())
}
