use anyhow::Context as _;
use clap::{Parser, Subcommand};
use skein_api::EventEnvelope;
use skein_domain::{Workspace, WorkspaceId};
use skein_engine::{Engine, EngineConfig, EngineServices, OfflineBackend};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(about = "Thread reconciliation core for streamed engine sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed recorded envelopes (one JSON object per line) through the router
    /// and print the resulting snapshot.
    Replay(ReplayArgs),
}

#[derive(clap::Args, Debug)]
struct ReplayArgs {
    file: PathBuf,
    /// Path registered for every workspace named by the recording.
    #[arg(long, default_value = ".")]
    path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Replay(args) => replay(args).await,
    }
}

async fn replay(args: ReplayArgs) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let config = EngineConfig::from_env();
    let services = EngineServices::from_config(&config, Arc::new(OfflineBackend));
    let (engine, _) = Engine::start(config, services);

    let mut workspaces = HashSet::new();
    let mut replayed = 0usize;
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope: EventEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "skipping unreadable envelope");
                continue;
            }
        };

        if let Some(workspace_id) = envelope.workspace_id()
            && workspaces.insert(workspace_id.to_owned())
        {
            engine
                .add_workspace(Workspace {
                    id: WorkspaceId::new(workspace_id),
                    name: workspace_id.to_owned(),
                    path: args.path.clone(),
                    connected: true,
                })
                .await?;
        }

        engine.send_event(envelope).await?;
        replayed += 1;
    }
    tracing::info!(envelopes = replayed, "replay finished");

    let snapshot = engine.snapshot().await?;
    let out = serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")?;
    println!("{out}");
    Ok(())
}
