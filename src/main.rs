use anyhow::{Context, Result};
use bt_core::{NodeRegistry, TreeManager};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};

/// Runs a behavior tree described by a tree file until interrupted.
#[derive(Parser, Debug)]
#[command(name = "bt-runtime", version, about)]
struct Cli {
    /// Path to a tree file (JSON/YAML/TOML, see the `config` crate) holding
    /// one or more tree descriptors.
    tree_file: PathBuf,

    /// Which tree in `tree_file` to run, defaulting to the file's `main_tree`.
    #[arg(long)]
    tree: Option<String>,

    /// Path to a runner config file. Falls back to built-in defaults when
    /// omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    let registry = NodeRegistry::new();

    let tree_file_str = cli.tree_file.to_string_lossy();
    let config_path_str = cli.config.as_ref().map(|p| p.to_string_lossy().to_string());
    let mut manager = TreeManager::load_from_config(
        tree_file_str.as_ref(),
        config_path_str.as_deref(),
        cli.tree.as_deref(),
        &registry,
    )
    .await
    .with_context(|| format!("failed to load tree from {:?}", cli.tree_file))?;

    info!(tree_file = %cli.tree_file.display(), "starting tree manager");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    manager.run(shutdown_rx).await?;
    manager.take_snapshot().await?;

    Ok(())
}
