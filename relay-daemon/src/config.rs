//! Typed process configuration.
//!
//! Values arrive from the CLI (flags or environment variables) as optional
//! strings; `validate` turns them into ready-to-use settings and reports the
//! first missing key by its environment variable name.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use relay_ingest::DEFAULT_GROUP_WINDOW;
use relay_sync::{
    BotApiConfig, BotApiSender, SenderAdapter, SyncerOptions, WebhookConfig, WebhookSender,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MEDIA_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CATCHUP_LIMIT: usize = 100;
pub const DEFAULT_BOTAPI_BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration value {key}")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("unknown platform '{0}'; expected one of: botapi, webhook")]
    UnknownPlatform(String),
}

/// Producer-wait protocol knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub poll_interval: Duration,
    /// Upper bound on the wait; an `in_progress` ledger older than this is
    /// treated as abandoned.
    pub max_wait: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Settings of the ingester process.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub storage_dir: PathBuf,
    pub source_dir: Option<PathBuf>,
    /// Channel label, used only in logs.
    pub channel: Option<String>,
    pub catch_up_limit: usize,
    pub event_poll_interval: Duration,
    pub group_window: Duration,
}

impl IngestConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            source_dir: None,
            channel: None,
            catch_up_limit: DEFAULT_CATCHUP_LIMIT,
            event_poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
            group_window: DEFAULT_GROUP_WINDOW,
        }
    }

    /// Check required values; returns the source directory.
    pub fn validate(&self) -> Result<PathBuf, ConfigError> {
        if self.catch_up_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "RELAY_CATCHUP_LIMIT",
                reason: "must be at least 1".to_string(),
            });
        }
        non_zero("event_poll_interval", self.event_poll_interval)?;
        self.source_dir.clone().ok_or(ConfigError::Missing {
            key: "RELAY_SOURCE_DIR",
        })
    }

    /// Label for logs: the channel name, or the source directory.
    pub fn channel_label(&self) -> String {
        match (&self.channel, &self.source_dir) {
            (Some(channel), _) => channel.clone(),
            (None, Some(dir)) => dir.display().to_string(),
            (None, None) => "<unset>".to_string(),
        }
    }
}

/// Downstream platforms with a built-in sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    BotApi,
    Webhook,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 2] = [PlatformKind::BotApi, PlatformKind::Webhook];

    pub fn name(&self) -> &'static str {
        match self {
            PlatformKind::BotApi => BotApiSender::PLATFORM,
            PlatformKind::Webhook => WebhookSender::PLATFORM,
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PlatformKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlatformKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownPlatform(s.to_string()))
    }
}

/// Raw credentials for every platform; only the selected one is required.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub botapi_token: Option<String>,
    pub botapi_chat_id: Option<String>,
    pub botapi_base_url: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_chat_id: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl PlatformConfig {
    /// Build the sender for `kind`, failing on the first missing value.
    pub fn build_sender(&self, kind: PlatformKind) -> Result<Box<dyn SenderAdapter>, ConfigError> {
        match kind {
            PlatformKind::BotApi => {
                let token = required(&self.botapi_token, "BOTAPI_TOKEN")?;
                let chat_id = required(&self.botapi_chat_id, "BOTAPI_CHAT_ID")?;
                let base_url = self
                    .botapi_base_url
                    .clone()
                    .filter(|u| !u.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_BOTAPI_BASE_URL.to_string());
                let mut config = BotApiConfig::new(base_url, token, chat_id);
                if let Some(timeout) = self.request_timeout {
                    config.timeout = timeout;
                }
                Ok(Box::new(BotApiSender::new(config)))
            }
            PlatformKind::Webhook => {
                let url = required(&self.webhook_url, "WEBHOOK_URL")?;
                let chat_id = required(&self.webhook_chat_id, "WEBHOOK_CHAT_ID")?;
                let mut config = WebhookConfig::new(url, chat_id);
                if let Some(timeout) = self.request_timeout {
                    config.timeout = timeout;
                }
                Ok(Box::new(WebhookSender::new(config)))
            }
        }
    }
}

/// Settings of one syncer process.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    pub storage_dir: PathBuf,
    pub platform: PlatformKind,
    pub credentials: PlatformConfig,
    pub wait: WaitConfig,
    pub watch_interval: Duration,
    pub media_delay: Duration,
}

impl SyncerConfig {
    pub fn new(storage_dir: impl Into<PathBuf>, platform: PlatformKind) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            platform,
            credentials: PlatformConfig::default(),
            wait: WaitConfig::default(),
            watch_interval: DEFAULT_WATCH_INTERVAL,
            media_delay: DEFAULT_MEDIA_DELAY,
        }
    }

    /// Check timing knobs and build the platform sender.
    pub fn validate(&self) -> Result<Box<dyn SenderAdapter>, ConfigError> {
        non_zero("watch_interval", self.watch_interval)?;
        non_zero("poll_interval", self.wait.poll_interval)?;
        self.credentials.build_sender(self.platform)
    }

    pub fn syncer_options(&self) -> SyncerOptions {
        SyncerOptions {
            media_delay: self.media_delay,
        }
    }
}

fn required(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing { key })
}

fn non_zero(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
