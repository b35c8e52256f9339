use std::time::Duration;

use anyhow::Result;
use clap::Args;

use relay_daemon::config::{DEFAULT_MAX_WAIT, DEFAULT_MEDIA_DELAY, DEFAULT_WATCH_INTERVAL};
use relay_daemon::{PlatformKind, SyncerConfig};

use super::{PlatformArgs, StorageArgs};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Platform to deliver to (botapi, webhook)
    platform: PlatformKind,

    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    credentials: PlatformArgs,

    /// Seconds between watch cycles
    #[arg(long, env = "RELAY_WATCH_INTERVAL", default_value_t = DEFAULT_WATCH_INTERVAL.as_secs())]
    watch_interval: u64,

    /// Longest wait for a running producer catch-up, in seconds
    #[arg(long, env = "RELAY_MAX_WAIT", default_value_t = DEFAULT_MAX_WAIT.as_secs())]
    max_wait: u64,

    /// Pause between consecutive media sends of one post, in milliseconds
    #[arg(long, env = "RELAY_MEDIA_DELAY_MS", default_value_t = DEFAULT_MEDIA_DELAY.as_millis() as u64)]
    media_delay_ms: u64,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let storage_dir = self.storage.resolve()?;
        let mut config = SyncerConfig::new(storage_dir, self.platform);
        config.credentials = self.credentials.into_config();
        config.watch_interval = Duration::from_secs(self.watch_interval);
        config.wait.max_wait = Duration::from_secs(self.max_wait);
        config.media_delay = Duration::from_millis(self.media_delay_ms);
        relay_daemon::start_syncer_blocking(config)?;
        Ok(())
    }
}
