//! Background extraction watcher
//!
//! One tokio task per session re-evaluates the overflow trigger on a fixed
//! interval, or earlier when nudged after a turn is appended. The task stops
//! when its shutdown channel fires or its handle is dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::extraction::pipeline::{CycleOutcome, ExtractionPipeline};
use crate::memory::session::SessionId;

/// Upper bound on back-to-back commits in one wake-up
const MAX_CYCLES_PER_WAKE: usize = 16;

/// Control handle for a running watcher
#[derive(Debug)]
pub struct WatcherHandle {
    session_id: SessionId,
    notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Wake the watcher before its next tick
    pub fn nudge(&self) {
        self.notify.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the watcher and wait for an in-flight cycle to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(session = %self.session_id, error = %e, "Watcher task panicked");
        }
    }
}

/// Spawn a watcher for `session_id`
pub fn spawn_watcher(
    pipeline: Arc<ExtractionPipeline>,
    session_id: SessionId,
    interval: Duration,
) -> WatcherHandle {
    let notify = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(watch_loop(
        pipeline,
        session_id.clone(),
        interval,
        Arc::clone(&notify),
        shutdown_rx,
    ));

    WatcherHandle {
        session_id,
        notify,
        shutdown: shutdown_tx,
        task,
    }
}

async fn watch_loop(
    pipeline: Arc<ExtractionPipeline>,
    session_id: SessionId,
    interval: Duration,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(session = %session_id, interval_secs = interval.as_secs(), "Extraction watcher started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = notify.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        for _ in 0..MAX_CYCLES_PER_WAKE {
            if *shutdown.borrow() {
                break;
            }
            match pipeline.run_cycle(&session_id, false).await {
                // keep draining while the backlog is still over the trigger
                Ok(CycleOutcome::Committed(_)) => continue,
                Ok(outcome) => {
                    debug!(session = %session_id, ?outcome, "Watcher tick");
                    break;
                }
                Err(e) => {
                    error!(session = %session_id, error = %e, "Extraction cycle failed");
                    break;
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }

    info!(session = %session_id, "Extraction watcher stopped");
}
