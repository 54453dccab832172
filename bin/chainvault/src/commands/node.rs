//! Node Subcommand

use crate::flags::IndexerArgs;
use anyhow::{Context, Result};
use chainvault_core::AlloyChainClient;
use chainvault_service::IndexerService;
use chainvault_storage::ChainDb;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The `node` Subcommand
///
/// Follows the upstream node, backfills history and sweeps balances until Ctrl-C.
///
/// # Usage
///
/// ```sh
/// chainvault node --rpc.url http://127.0.0.1:8545 --datadir ./data
/// ```
#[derive(Parser, Debug, Clone)]
#[command(about = "Runs the indexer against an upstream node")]
pub(crate) struct NodeCommand {
    /// Indexer arguments.
    #[command(flatten)]
    pub(crate) indexer: IndexerArgs,
}

impl NodeCommand {
    /// Runs the subcommand.
    pub(crate) async fn run(self) -> Result<()> {
        let config = self.indexer.config();

        std::fs::create_dir_all(&config.datadir).with_context(|| {
            format!("failed to create datadir {}", config.datadir.display())
        })?;
        let db = ChainDb::new(&config.datadir)
            .with_context(|| format!("failed to open datastore at {}", config.datadir.display()))?;
        let client = AlloyChainClient::new(config.rpc_url.clone(), config.head_poll_interval);

        let cancellation = CancellationToken::new();
        let service =
            IndexerService::new(config, Arc::new(client), Arc::new(db), cancellation.clone())
                .context("invalid indexer configuration")?;

        let mut handle = tokio::spawn(service.start());
        tokio::select! {
            joined = &mut handle => {
                return joined.context("indexer task panicked")?.context("indexer stopped");
            }
            _ = tokio::signal::ctrl_c() => {
                info!(target: "chainvault", "Received Ctrl-C, shutting down");
                cancellation.cancel();
            }
        }

        handle.await.context("indexer task panicked")?.context("indexer stopped with an error")
    }
}
