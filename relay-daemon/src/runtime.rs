use std::fs;
use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use relay_core::RecordStore;
use relay_ingest::{ExportSource, IngestEngine, SourceClient};
use relay_sync::{CycleOutcome, PlatformSyncer, SenderAdapter};

use crate::config::{IngestConfig, SyncerConfig};
use crate::error::{io_err, DaemonError};
use crate::wait::wait_for_producer;

/// Live-follow knobs of the ingest runtime.
#[derive(Debug, Clone, Copy)]
pub struct IngestTiming {
    pub catch_up_limit: usize,
    pub event_poll_interval: Duration,
}

/// Open the storage directory as a Record Store, creating it if needed.
pub fn open_store(storage_dir: &Path) -> Result<RecordStore, DaemonError> {
    fs::create_dir_all(storage_dir).map_err(|e| io_err(storage_dir, e))?;
    Ok(RecordStore::open(storage_dir)?)
}

/// Run the ingester described by `config` and block until it exits.
pub fn start_ingest_blocking(config: IngestConfig) -> Result<(), DaemonError> {
    init_tracing();
    let source_dir = config.validate()?;
    let store = open_store(&config.storage_dir)?;
    let source = ExportSource::open(&source_dir).map_err(relay_ingest::IngestError::from)?;
    let engine = IngestEngine::new(store, source, config.group_window);
    let timing = IngestTiming {
        catch_up_limit: config.catch_up_limit,
        event_poll_interval: config.event_poll_interval,
    };
    tracing::info!(
        channel = %config.channel_label(),
        storage = %config.storage_dir.display(),
        "starting ingester"
    );

    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let signal_handle = spawn_signal_handler(shutdown_tx.clone());
        let result = run_ingest(engine, timing, shutdown_tx.clone()).await;
        let _ = shutdown_tx.send(());
        handle_join("signal_handler", signal_handle.await)?;
        result.map(|_| ())
    })
}

/// Run one platform syncer described by `config` and block until it exits.
pub fn start_syncer_blocking(config: SyncerConfig) -> Result<(), DaemonError> {
    init_tracing();
    let sender = config.validate()?;
    let store = open_store(&config.storage_dir)?;
    let syncer = PlatformSyncer::load(store, sender, config.syncer_options())?;
    tracing::info!(
        platform = %config.platform,
        storage = %config.storage_dir.display(),
        "starting syncer"
    );

    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let signal_handle = spawn_signal_handler(shutdown_tx.clone());
        let result = run_syncer(syncer, &config, shutdown_tx.clone()).await;
        let _ = shutdown_tx.send(());
        handle_join("signal_handler", signal_handle.await)?;
        result.map(|_| ())
    })
}

/// One-shot catch-up pass: clear any stale ledger, run the pass, exit.
pub fn run_catch_up_once(config: IngestConfig) -> Result<relay_core::SyncCounts, DaemonError> {
    init_tracing();
    let source_dir = config.validate()?;
    let store = open_store(&config.storage_dir)?;
    let source = ExportSource::open(&source_dir).map_err(relay_ingest::IngestError::from)?;
    let mut engine = IngestEngine::new(store, source, config.group_window);
    engine.clear_stale_status()?;
    Ok(engine.sync_latest_posts(config.catch_up_limit)?)
}

// ---------------------------------------------------------------------------
// Syncer runtime
// ---------------------------------------------------------------------------

/// `WaitingForProducer → InitialCatchUp → Watching → ShuttingDown`.
///
/// Returns the syncer after a clean shutdown. A send failure persists the
/// ledger (inside the syncer) and is returned as an error.
pub async fn run_syncer<S>(
    syncer: PlatformSyncer<S>,
    config: &SyncerConfig,
    shutdown: broadcast::Sender<()>,
) -> Result<PlatformSyncer<S>, DaemonError>
where
    S: SenderAdapter + 'static,
{
    let mut shutdown_rx = shutdown.subscribe();
    let platform = syncer.platform().to_string();

    let (syncer, connected) = blocking("connection_test", syncer, |s| s.sender().test_connection()).await?;
    connected.map_err(|source| DaemonError::Connection {
        platform: platform.clone(),
        source,
    })?;
    tracing::info!(platform = %platform, "connection test passed");

    let outcome = wait_for_producer(syncer.status_ledger(), &config.wait, &mut shutdown_rx).await;
    if !outcome.should_proceed() {
        return finish_syncer(syncer).await;
    }
    tracing::debug!(platform = %platform, outcome = ?outcome, "producer wait finished");

    let (syncer, report) = blocking("initial_catch_up", syncer, |s| s.catch_up()).await?;
    let report = report.map_err(|err| {
        tracing::error!(platform = %platform, error = %err, "initial catch-up failed, stopping");
        err
    })?;
    tracing::info!(
        platform = %platform,
        delivered = report.delivered,
        discarded = report.discarded,
        deferred = report.deferred,
        "initial catch-up finished"
    );

    let mut syncer = syncer;
    let mut ticker = interval(config.watch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let (returned, cycle) = blocking("watch_cycle", syncer, |s| s.watch_cycle()).await?;
                syncer = returned;
                match cycle {
                    Ok(CycleOutcome::ProducerBusy) => {
                        tracing::debug!(platform = %platform, "producer busy, cycle skipped");
                    }
                    Ok(CycleOutcome::Processed(report)) if !report.is_idle() => {
                        tracing::info!(
                            platform = %platform,
                            delivered = report.delivered,
                            edited = report.edited,
                            deleted = report.deleted,
                            cleaned = report.cleaned,
                            "watch cycle"
                        );
                    }
                    Ok(CycleOutcome::Processed(_)) => {}
                    Err(err) => {
                        tracing::error!(platform = %platform, error = %err, "send failed, stopping syncer");
                        return Err(err.into());
                    }
                }
            }
        }
    }

    tracing::info!(platform = %platform, "shutting down syncer");
    finish_syncer(syncer).await
}

async fn finish_syncer<S>(syncer: PlatformSyncer<S>) -> Result<PlatformSyncer<S>, DaemonError>
where
    S: SenderAdapter + 'static,
{
    let (syncer, flushed) = blocking("shutdown", syncer, |s| s.shutdown()).await?;
    flushed?;
    Ok(syncer)
}

// ---------------------------------------------------------------------------
// Ingest runtime
// ---------------------------------------------------------------------------

/// Clear the stale ledger, run one catch-up pass, then follow live events
/// and finalize albums until shutdown.
///
/// A failed catch-up pass is recorded in the ledger and not retried; the
/// runtime keeps following live events.
pub async fn run_ingest<C>(
    engine: IngestEngine<C>,
    timing: IngestTiming,
    shutdown: broadcast::Sender<()>,
) -> Result<IngestEngine<C>, DaemonError>
where
    C: SourceClient + 'static,
{
    let mut shutdown_rx = shutdown.subscribe();

    let (engine, cleared) = blocking("clear_status", engine, |e| e.clear_stale_status()).await?;
    cleared?;

    let limit = timing.catch_up_limit;
    let (mut engine, counts) =
        blocking("catch_up", engine, move |e| e.sync_latest_posts(limit)).await?;
    match counts {
        Ok(counts) => tracing::info!(
            new = counts.new_posts,
            updated = counts.updated_posts,
            skipped = counts.skipped_posts,
            "catch-up finished"
        ),
        Err(err) => tracing::error!(error = %err, "catch-up failed, continuing with live events"),
    }

    let mut poll = interval(timing.event_poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let group_deadline = engine.next_group_deadline().map(Instant::from_std);
        let timer = group_deadline.unwrap_or_else(|| Instant::now() + timing.event_poll_interval);

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until(timer), if group_deadline.is_some() => {
                let now = Instant::now().into_std();
                let (returned, written) =
                    blocking("finalize_groups", engine, move |e| e.flush_due_groups(now)).await?;
                engine = returned;
                if written > 0 {
                    tracing::debug!(written, "albums finalized");
                }
            }
            _ = poll.tick() => {
                let now = Instant::now().into_std();
                let (returned, ()) = blocking("poll_events", engine, move |e| apply_events(e, now)).await?;
                engine = returned;
            }
        }
    }

    tracing::info!("shutting down ingester");
    let (engine, flushed) = blocking("flush_groups", engine, |e| e.flush_all_groups()).await?;
    if flushed > 0 {
        tracing::info!(flushed, "pending albums written on shutdown");
    }
    Ok(engine)
}

fn apply_events<C: SourceClient>(engine: &mut IngestEngine<C>, now: std::time::Instant) {
    let events = match engine.source_mut().poll_events() {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!(error = %err, "event poll failed");
            return;
        }
    };
    for event in events {
        let kind = event.kind();
        let ids = event_ids(&event);
        if let Err(err) = engine.handle_event(event, now) {
            tracing::warn!(event = kind, ids = ?ids, error = %err, "event not applied");
        }
    }
}

fn event_ids(event: &relay_ingest::SourceEvent) -> Vec<i64> {
    use relay_ingest::SourceEvent;
    match event {
        SourceEvent::New { message } | SourceEvent::Edited { message } => vec![message.id],
        SourceEvent::Deleted { ids } | SourceEvent::Pinned { ids } => ids.clone(),
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Move `value` onto the blocking pool, run `f` on it, and hand it back.
async fn blocking<T, R, F>(task: &'static str, value: T, f: F) -> Result<(T, R), DaemonError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut T) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut value = value;
        let result = f(&mut value);
        (value, result)
    })
    .await
    .map_err(|err| DaemonError::Join(format!("{task}: {err}")))
}

fn spawn_signal_handler(
    shutdown: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<Result<(), DaemonError>> {
    tokio::spawn(async move {
        let mut shutdown_rx = shutdown.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => Ok(()),
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => Err(DaemonError::Signal(err.to_string())),
                }
            }
        }
    })
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join(format!("{task}: {err}"))),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

/// Install the process-wide subscriber. `RUST_LOG` overrides the default
/// `info` filter; `RELAY_LOG_FORMAT=json` switches to JSON lines. Logs go to
/// stderr so command output on stdout stays clean.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RELAY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
