//! Producer-wait protocol run by a syncer before its initial catch-up.
//!
//! Polls the Sync Status Ledger until the producer's catch-up pass is over,
//! never longer than `max_wait`. A pass whose `startTime` is already older
//! than `max_wait` is abandoned (a crashed producer) and not waited on.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use relay_core::StatusLedger;

use crate::config::WaitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No pass running (or it finished while we waited).
    Ready,
    /// The running pass started more than `max_wait` ago.
    Abandoned,
    /// Still running after `max_wait`; proceeding anyway.
    TimedOut,
    /// Shutdown was requested while waiting.
    Cancelled,
}

impl WaitOutcome {
    pub fn should_proceed(&self) -> bool {
        !matches!(self, WaitOutcome::Cancelled)
    }
}

/// Read the ledger off the async worker. An unreadable ledger counts as
/// "no pass running", matching [`StatusLedger::in_progress_since`].
async fn read_in_progress(status: &StatusLedger) -> Option<DateTime<Utc>> {
    let status = status.clone();
    match tokio::task::spawn_blocking(move || status.in_progress_since()).await {
        Ok(since) => since,
        Err(err) => {
            tracing::warn!(error = %err, "status ledger read did not complete");
            None
        }
    }
}

/// Wait for the producer to finish its catch-up pass.
pub async fn wait_for_producer(
    status: &StatusLedger,
    config: &WaitConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> WaitOutcome {
    let Some(since) = read_in_progress(status).await else {
        return WaitOutcome::Ready;
    };

    // A start time in the future (clock skew) counts as age zero.
    let age = Utc::now()
        .signed_duration_since(since)
        .to_std()
        .unwrap_or_default();
    if age >= config.max_wait {
        tracing::warn!(
            started_at = %since,
            max_wait_secs = config.max_wait.as_secs(),
            "producer catch-up started longer ago than the wait bound, treating as abandoned"
        );
        return WaitOutcome::Abandoned;
    }

    tracing::info!(started_at = %since, "producer catch-up in progress, waiting");
    let deadline = Instant::now() + config.max_wait;
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("shutdown requested while waiting for producer");
                return WaitOutcome::Cancelled;
            }
            _ = sleep_until(deadline) => {
                tracing::warn!(
                    max_wait_secs = config.max_wait.as_secs(),
                    "producer catch-up still running after the wait bound, proceeding"
                );
                return WaitOutcome::TimedOut;
            }
            _ = ticker.tick() => {
                if read_in_progress(status).await.is_none() {
                    tracing::info!("producer catch-up finished");
                    return WaitOutcome::Ready;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use relay_core::store::write_json_atomic;
    use relay_core::{SyncCounts, SyncStatus};
    use tempfile::TempDir;

    fn config() -> WaitConfig {
        WaitConfig {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(5 * 60),
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn ready_when_no_ledger() {
        let dir = TempDir::new().expect("storage");
        let status = StatusLedger::at(dir.path());
        let (_tx, mut rx) = broadcast::channel(1);
        assert_eq!(
            wait_for_producer(&status, &config(), &mut rx).await,
            WaitOutcome::Ready
        );
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn ledger_rewritten_mid_wait_is_read_each_tick() {
        let dir = TempDir::new().expect("storage");
        let status = StatusLedger::at(dir.path());
        let _pass = status.begin(100).expect("begin");
        let (_tx, mut rx) = broadcast::channel(1);

        let corrupter = {
            let path = status.path().to_path_buf();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                std::fs::write(path, b"{ not json").expect("corrupt ledger");
            })
        };

        let started = Instant::now();
        let outcome = wait_for_producer(&status, &config(), &mut rx).await;
        assert_eq!(outcome, WaitOutcome::Ready, "malformed ledger fails open");
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        corrupter.await.expect("corrupter task");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn six_minute_old_pass_is_not_waited_on() {
        let dir = TempDir::new().expect("storage");
        let status = StatusLedger::at(dir.path());
        write_json_atomic(
            status.path(),
            &SyncStatus::InProgress {
                start_time: Utc::now() - chrono::Duration::minutes(6),
                limit: 100,
            },
        )
        .expect("write ledger");
        let (_tx, mut rx) = broadcast::channel(1);

        let started = Instant::now();
        let outcome = wait_for_producer(&status, &config(), &mut rx).await;
        assert_eq!(outcome, WaitOutcome::Abandoned);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn fresh_pass_times_out_at_the_bound() {
        let dir = TempDir::new().expect("storage");
        let status = StatusLedger::at(dir.path());
        let _pass = status.begin(100).expect("begin");
        let (_tx, mut rx) = broadcast::channel(1);

        let started = Instant::now();
        let outcome = wait_for_producer(&status, &config(), &mut rx).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(5 * 60));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn returns_once_producer_completes() {
        let dir = TempDir::new().expect("storage");
        let status = StatusLedger::at(dir.path());
        let pass = status.begin(100).expect("begin");
        let (_tx, mut rx) = broadcast::channel(1);

        let producer = {
            let status = status.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2_500)).await;
                status
                    .complete(pass, SyncCounts::default())
                    .expect("complete");
            })
        };

        let started = Instant::now();
        let outcome = wait_for_producer(&status, &config(), &mut rx).await;
        assert_eq!(outcome, WaitOutcome::Ready);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        producer.await.expect("producer task");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn shutdown_cancels_the_wait() {
        let dir = TempDir::new().expect("storage");
        let status = StatusLedger::at(dir.path());
        let _pass = status.begin(100).expect("begin");
        let (tx, mut rx) = broadcast::channel(1);

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let _ = tx.send(());
        });

        let outcome = wait_for_producer(&status, &config(), &mut rx).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(!outcome.should_proceed());
        trigger.await.expect("trigger task");
    }
}
