//! Status Subcommand

use anyhow::{Context, Result, bail};
use chainvault_storage::{BlockStorageReader, ChainDb, CheckpointKey, CheckpointStorage};
use clap::Parser;
use std::path::PathBuf;

/// The `status` Subcommand
///
/// Prints the latest stored block and the task checkpoints of a local datastore.
///
/// # Usage
///
/// ```sh
/// chainvault status --datadir ./data
/// ```
#[derive(Parser, Debug, Clone)]
#[command(about = "Prints the progress recorded in a local datastore")]
pub(crate) struct StatusCommand {
    /// Directory of the local datastore.
    #[arg(long, env = "CHAINVAULT_DATADIR")]
    pub(crate) datadir: PathBuf,
}

impl StatusCommand {
    /// Runs the subcommand.
    pub(crate) fn run(self) -> Result<()> {
        println!("{}", self.report()?);
        Ok(())
    }

    fn report(&self) -> Result<String> {
        if !self.datadir.is_dir() {
            bail!("no datastore at {}", self.datadir.display());
        }
        let db = ChainDb::new(&self.datadir)
            .with_context(|| format!("failed to open datastore at {}", self.datadir.display()))?;

        let latest = match db.latest_block()? {
            Some(block) => format!("{} ({})", block.number, block.hash),
            None => "none".to_string(),
        };
        let checkpoint = |key| -> Result<String> {
            Ok(db
                .get_checkpoint(key)?
                .map_or_else(|| "none".to_string(), |value| value.to_string()))
        };

        Ok(format!(
            "latest block:    {latest}\nbackfill head:   {}\nsweep watermark: {}",
            checkpoint(CheckpointKey::BackfillHead)?,
            checkpoint(CheckpointKey::SweepWatermark)?,
        ))
    }
}
