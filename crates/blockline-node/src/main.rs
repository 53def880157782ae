use anyhow::Context;
use blockline_core::{Block, BlockFactory, ChainStore};
use blockline_node::constants::DEFAULT_LOG_FILTER;
use blockline_node::prompt::{run_prompt, stdin_lines};
use blockline_node::{Args, PeerListener};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let store = ChainStore::with_genesis(Block::genesis())
        .context("failed to initialize genesis block")?;

    let listener = PeerListener::bind(&args.listen, store.clone(), args.peer_config())
        .await
        .with_context(|| format!("failed to listen on {}", args.listen))?;
    info!("blockline-node listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();

    if !args.no_prompt {
        let factory = BlockFactory::with_difficulty(store.clone(), args.difficulty);
        let token = shutdown.clone();
        tokio::spawn(async move {
            match run_prompt(factory, stdin_lines(), token).await {
                Ok(accepted) => info!(accepted, "prompt input closed"),
                Err(err) => warn!(%err, "prompt stopped"),
            }
        });
    }

    listener
        .run_until(shutdown, tokio::signal::ctrl_c())
        .await
        .context("peer listener stopped")?;

    info!(height = store.len().saturating_sub(1), "node stopped");
    Ok(())
}
