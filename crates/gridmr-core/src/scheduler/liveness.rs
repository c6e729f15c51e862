//! Worker liveness sweeper
//!
//! Workers that miss heartbeats degrade in two steps: Suspect after
//! `heartbeat_timeout` (no new dispatches, running attempts continue), Dead
//! after `dead_timeout` (every attempt they held is timed out and its task
//! requeued). The transitions themselves live on the state machine; this
//! module is the clock that drives them.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::debug;

use crate::scheduler::dispatch::{now_ms, Scheduler};

/// Periodic sweep over all registered workers
pub async fn run_sweeper(scheduler: Arc<Scheduler>) {
    let interval = scheduler.config.sweep_interval();
    let heartbeat_timeout_ms = scheduler.config.heartbeat_timeout_ms;
    let dead_timeout_ms = scheduler.config.dead_timeout_ms;
    let cancel_grace_ms = scheduler.config.cancel_grace_ms;

    debug!(
        "Liveness sweeper running: interval={:?}, heartbeat_timeout_ms={}, dead_timeout_ms={}",
        interval, heartbeat_timeout_ms, dead_timeout_ms
    );

    loop {
        sleep(interval).await;
        scheduler.state.write().await.sweep_workers(
            now_ms(),
            heartbeat_timeout_ms,
            dead_timeout_ms,
            cancel_grace_ms,
        );
    }
}
