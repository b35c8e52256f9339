use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{SourceArgs, StorageArgs};

#[derive(Args, Debug)]
pub struct CatchUpArgs {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    source: SourceArgs,
}

impl CatchUpArgs {
    pub fn run(self) -> Result<()> {
        let storage_dir = self.storage.resolve()?;
        let config = self.source.into_config(storage_dir);
        let counts = relay_daemon::run_catch_up_once(config)?;
        println!(
            "{} catch-up complete: {} new, {} updated, {} skipped",
            "✓".green(),
            counts.new_posts,
            counts.updated_posts,
            counts.skipped_posts
        );
        Ok(())
    }
}
