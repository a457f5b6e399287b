// argo/crates/argo/src/main.rs

#[cfg(feature = "cli")]
use argo::{config::Config, run_server, AppState, ImportMode};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use tracing::info;

#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "argo", version, about = "Assistant backend over a local message history")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Index the message history into the vector store
    Import {
        /// Clear the history index first
        #[arg(long)]
        full: bool,
    },
    /// Index messages newer than the unread watermarks
    Sync,
    /// Mark all current history as read
    ResetUnread,
    /// Re-embed every stored discussion message
    RebuildDiscussions,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    argo::telemetry::init_tracing();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::Import { full } => {
            let state = AppState::open(cfg)?;
            let mode = if full { ImportMode::Full } else { ImportMode::Incremental };
            let report = state.importer.import(mode).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Sync => {
            let state = AppState::open(cfg)?;
            let added = state.unread.sync_new_messages().await?;
            info!("Sync finished");
            println!("Synced {} new messages", added);
            Ok(())
        }
        Command::ResetUnread => {
            let state = AppState::open(cfg)?;
            let watermarks = state.unread.reset()?;
            println!("Reset unread state for {} contacts", watermarks.len());
            Ok(())
        }
        Command::RebuildDiscussions => {
            let state = AppState::open(cfg)?;
            let report = state.discussions.rebuild_index().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
