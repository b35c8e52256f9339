pub mod catch_up;
pub mod ingest;
pub mod status;
pub mod sync;
pub mod test_connection;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use relay_daemon::config::{DEFAULT_CATCHUP_LIMIT, DEFAULT_EVENT_POLL_INTERVAL};
use relay_daemon::{IngestConfig, PlatformConfig};

/// Location of the shared storage directory.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Storage directory shared by the ingester and all syncers
    /// [default: <data dir>/channel-relay]
    #[arg(long, env = "RELAY_STORAGE_DIR", value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl StorageArgs {
    pub fn resolve(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("channel-relay"))
                .context("could not determine a data directory; pass --storage-dir"),
        }
    }
}

/// Where the ingester reads the channel from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Channel export directory (messages.jsonl, events.jsonl, media/)
    #[arg(long, env = "RELAY_SOURCE_DIR", value_name = "DIR")]
    pub source_dir: Option<PathBuf>,

    /// Channel name, used in logs
    #[arg(long, env = "RELAY_CHANNEL")]
    pub channel: Option<String>,

    /// How many of the most recent posts a catch-up pass considers
    #[arg(long, env = "RELAY_CATCHUP_LIMIT", default_value_t = DEFAULT_CATCHUP_LIMIT)]
    pub limit: usize,
}

impl SourceArgs {
    pub fn into_config(self, storage_dir: PathBuf) -> IngestConfig {
        let mut config = IngestConfig::new(storage_dir);
        config.source_dir = self.source_dir;
        config.channel = self.channel;
        config.catch_up_limit = self.limit;
        config
    }
}

/// Credentials for every built-in platform; only the selected one is checked.
#[derive(Args, Debug, Clone)]
pub struct PlatformArgs {
    #[arg(long, env = "BOTAPI_TOKEN", hide_env_values = true)]
    pub botapi_token: Option<String>,

    #[arg(long, env = "BOTAPI_CHAT_ID")]
    pub botapi_chat_id: Option<String>,

    #[arg(long, env = "BOTAPI_BASE_URL")]
    pub botapi_base_url: Option<String>,

    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[arg(long, env = "WEBHOOK_CHAT_ID")]
    pub webhook_chat_id: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT", value_name = "SECS")]
    pub request_timeout: Option<u64>,
}

impl PlatformArgs {
    pub fn into_config(self) -> PlatformConfig {
        PlatformConfig {
            botapi_token: self.botapi_token,
            botapi_chat_id: self.botapi_chat_id,
            botapi_base_url: self.botapi_base_url,
            webhook_url: self.webhook_url,
            webhook_chat_id: self.webhook_chat_id,
            request_timeout: self.request_timeout.map(Duration::from_secs),
        }
    }
}

/// Live-follow poll interval for the ingester, in milliseconds.
pub fn default_event_poll_ms() -> u64 {
    DEFAULT_EVENT_POLL_INTERVAL.as_millis() as u64
}
