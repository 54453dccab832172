//! Contains the chainvault CLI.

use crate::{
    commands::{NodeCommand, StatusCommand},
    flags::GlobalArgs,
};
use anyhow::Result;
use chainvault_cli::cli_styles;
use clap::{Parser, Subcommand};
use std::future::Future;

/// Subcommands of the chainvault binary.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Commands {
    /// Runs the indexer against an upstream node.
    #[command(alias = "n")]
    Node(NodeCommand),
    /// Prints the progress recorded in a local datastore.
    Status(StatusCommand),
}

/// The chainvault CLI.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, styles = cli_styles(), long_about = None)]
pub(crate) struct Cli {
    /// Global arguments for the CLI.
    #[command(flatten)]
    pub(crate) global: GlobalArgs,
    /// The subcommand to run.
    #[command(subcommand)]
    pub(crate) subcommand: Commands,
}

impl Cli {
    /// Runs the CLI.
    pub(crate) fn run(self) -> Result<()> {
        self.global.log_args.init_tracing()?;

        match self.subcommand {
            Commands::Node(node) => {
                self.global.metrics.init_metrics()?;
                Self::run_until_ctrl_c(node.run())
            }
            Commands::Status(status) => status.run(),
        }
    }

    /// Blocks on `fut` inside a fresh multi-threaded runtime.
    fn run_until_ctrl_c<F>(fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        rt.block_on(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_subcommand() {
        let cli = Cli::try_parse_from([
            "chainvault",
            "-v",
            "node",
            "--rpc.url",
            "http://127.0.0.1:8545",
            "--datadir",
            "/tmp/chainvault",
        ])
        .unwrap();
        assert_eq!(cli.global.log_args.v, 1);
        assert!(matches!(cli.subcommand, Commands::Node(_)));
    }

    #[test]
    fn test_parse_status_subcommand() {
        let cli =
            Cli::try_parse_from(["chainvault", "status", "--datadir", "/tmp/chainvault"]).unwrap();
        assert!(matches!(cli.subcommand, Commands::Status(_)));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["chainvault"]).is_err());
    }
}
