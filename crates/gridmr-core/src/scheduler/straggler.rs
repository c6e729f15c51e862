//! Straggler monitor
//!
//! Each tick examines every active job independently. Once a quarter of the
//! job's current phase has committed, the median committed duration becomes
//! the baseline: any attempt running longer than `straggler_threshold x
//! median` gets a speculative backup on a different worker, and any attempt
//! past `task_deadline_factor x median` is forcibly timed out and cancelled.
//! The original is never cancelled just because a backup launched; the
//! commit protocol settles the race.
//!
//! Jobs that never reach the baseline ratio never speculate. Small jobs with
//! a single straggler therefore run it to completion, which keeps the
//! monitor from thrashing on statistically meaningless medians.

use std::sync::Arc;
use tokio::time::sleep;
use tracing::debug;

use crate::scheduler::dispatch::{now_ms, Scheduler};

/// Periodic straggler and deadline check
pub async fn run_monitor(scheduler: Arc<Scheduler>) {
    let interval = scheduler.config.check_interval();
    let threshold = scheduler.config.straggler_threshold;
    let min_baseline_ratio = scheduler.config.min_baseline_ratio;
    let deadline_factor = scheduler.config.task_deadline_factor;

    debug!(
        "Straggler monitor running: interval={:?}, threshold={}, min_baseline_ratio={}",
        interval, threshold, min_baseline_ratio
    );

    loop {
        sleep(interval).await;

        let cancels = scheduler.state.write().await.straggler_pass(
            now_ms(),
            threshold,
            min_baseline_ratio,
            deadline_factor,
        );

        scheduler.fire_cancels(cancels);
    }
}
