use std::time::Duration;

use anyhow::Result;
use clap::Args;

use super::{default_event_poll_ms, SourceArgs, StorageArgs};

#[derive(Args, Debug)]
pub struct IngestArgs {
    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    source: SourceArgs,

    /// How often to poll the source for live events, in milliseconds
    #[arg(long, env = "RELAY_EVENT_POLL_MS", default_value_t = default_event_poll_ms())]
    event_poll_ms: u64,
}

impl IngestArgs {
    pub fn run(self) -> Result<()> {
        let storage_dir = self.storage.resolve()?;
        let mut config = self.source.into_config(storage_dir);
        config.event_poll_interval = Duration::from_millis(self.event_poll_ms);
        relay_daemon::start_ingest_blocking(config)?;
        Ok(())
    }
}
