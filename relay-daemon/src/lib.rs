//! Process runtimes: the ingester loop, the per-platform syncer loop and the
//! producer-wait protocol, plus typed configuration.

pub mod config;
mod error;
mod runtime;
pub mod wait;

pub use config::{
    ConfigError, IngestConfig, PlatformConfig, PlatformKind, SyncerConfig, WaitConfig,
};
pub use error::DaemonError;
pub use runtime::{
    init_tracing, open_store, run_catch_up_once, run_ingest, run_syncer, start_ingest_blocking,
    start_syncer_blocking, IngestTiming,
};
pub use wait::{wait_for_producer, WaitOutcome};
