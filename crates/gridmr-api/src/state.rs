use std::sync::Arc;
use tokio::sync::RwLock;

use gridmr_core::client::SchedulerClient;
use gridmr_core::scheduler::worker_registry::WorkerId;
use gridmr_core::scheduler::Scheduler;
use gridmr_core::worker::TaskExecutor;

/// Shared state of the scheduler HTTP surface
#[derive(Clone)]
pub struct SchedulerAppState {
    pub scheduler: Arc<Scheduler>,
}

impl SchedulerAppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

/// Shared state of the worker HTTP surface
#[derive(Clone)]
pub struct WorkerAppState {
    pub executor: Arc<TaskExecutor>,

    pub client: Arc<SchedulerClient>,

    /// Current registration; replaced if the worker re-registers
    pub worker_id: Arc<RwLock<WorkerId>>,
}

impl WorkerAppState {
    pub fn new(
        executor: Arc<TaskExecutor>,
        client: Arc<SchedulerClient>,
        worker_id: Arc<RwLock<WorkerId>>,
    ) -> Self {
        Self {
            executor,
            client,
            worker_id,
        }
    }
}
