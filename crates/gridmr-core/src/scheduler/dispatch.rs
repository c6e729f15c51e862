//! Scheduler facade and dispatch loop
//!
//! [`Scheduler`] wraps the state machine behind one coarse async lock and
//! owns the blob store and the worker transport. Every RPC handler and
//! background loop goes through it. State mutations happen under the lock;
//! worker RPCs and blob store I/O happen outside it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::blobstore::{paths, BlobStore};
use crate::config::{Config, SchedulingConfig};
use crate::error::{Error, Result};
use crate::protocol::{
    ExecuteMapRequest, ExecuteReduceRequest, HeartbeatRequest, HeartbeatResponse,
    JobStatusResponse, RegisterWorkerRequest, SubmitJobRequest, TaskCompletedRequest,
    TaskCompletedResponse,
};
use crate::scheduler::job::{JobId, JobSpec};
use crate::scheduler::state::{Assignment, CancelDirective, SchedulerState};
use crate::scheduler::task::{AttemptId, TaskKind};
use crate::scheduler::worker_registry::WorkerId;

/// Current wall clock in unix millis
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Pushes dispatched work to workers
///
/// The production implementation speaks HTTP; tests run attempts in-process
/// behind the same seam.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    async fn execute_map(&self, endpoint: &str, request: ExecuteMapRequest) -> Result<()>;

    async fn execute_reduce(&self, endpoint: &str, request: ExecuteReduceRequest) -> Result<()>;

    async fn cancel(&self, endpoint: &str, attempt_id: AttemptId) -> Result<()>;
}

/// The singleton scheduling component
pub struct Scheduler {
    pub(crate) state: Arc<RwLock<SchedulerState>>,

    pub(crate) store: Arc<dyn BlobStore>,

    pub(crate) transport: Arc<dyn TaskTransport>,

    pub(crate) config: SchedulingConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn BlobStore>,
        transport: Arc<dyn TaskTransport>,
        config: &Config,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SchedulerState::new(
                config.scheduling.max_attempts,
            ))),
            store,
            transport,
            config: config.scheduling.clone(),
        }
    }

    /// Start the background loops: dispatcher, liveness sweeper, straggler
    /// monitor and temporary-blob GC
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        info!("Starting scheduler loops");
        vec![
            tokio::spawn(run_dispatcher(self.clone())),
            tokio::spawn(crate::scheduler::liveness::run_sweeper(self.clone())),
            tokio::spawn(crate::scheduler::straggler::run_monitor(self.clone())),
            tokio::spawn(run_tmp_gc(self)),
        ]
    }

    // ---- client surface ----

    /// Validate and admit a job, returning its id synchronously
    pub async fn submit_job(&self, request: SubmitJobRequest) -> Result<JobId> {
        let spec = JobSpec {
            input_path: request.input_path,
            output_path: request.output_path,
            mapper_ref: request.mapper_ref,
            reducer_ref: request.reducer_ref,
            num_maps: request.num_maps,
            num_reduces: request.num_reduces,
        };
        spec.validate()?;

        if !self.store.exists(&spec.input_path).await? {
            return Err(Error::bad_request(format!(
                "input {} does not exist",
                spec.input_path
            )));
        }
        let line_count = self.store.line_count(&spec.input_path).await?;

        Ok(self
            .state
            .write()
            .await
            .admit_job(spec, line_count, now_ms()))
    }

    /// Status snapshot for one job
    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatusResponse> {
        self.state.read().await.job_status(job_id)
    }

    /// Read committed output lines under a path, oldest partition first
    pub async fn read_results(
        &self,
        output_path: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let blobs = self.store.list(output_path).await?;
        let mut lines = Vec::new();

        for blob in blobs {
            if paths::is_tmp(&blob) || !blob.ends_with(".txt") {
                continue;
            }
            let data = self.store.read(&blob).await?;
            let text = String::from_utf8(data)
                .map_err(|e| Error::blob_store(format!("{}: not valid UTF-8: {}", blob, e)))?;
            lines.extend(text.lines().map(|l| l.to_string()));

            if let Some(limit) = limit {
                if lines.len() >= limit {
                    lines.truncate(limit);
                    break;
                }
            }
        }

        Ok(lines)
    }

    /// Write a client-supplied blob into the store
    pub async fn upload_blob(&self, remote_path: &str, data: &[u8]) -> Result<()> {
        self.store.write(remote_path, data).await
    }

    // ---- worker surface ----

    /// Register a worker and return its id
    pub async fn register_worker(&self, request: RegisterWorkerRequest) -> WorkerId {
        self.state
            .write()
            .await
            .register_worker(&request.endpoint, request.capacity, now_ms())
    }

    /// Reconcile a heartbeat
    pub async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse> {
        let cancellations = self.state.write().await.reconcile_heartbeat(
            request.worker_id,
            &request.in_flight,
            now_ms(),
        )?;
        Ok(HeartbeatResponse { cancellations })
    }

    /// Record a completion report; the reply tells the worker what to do
    /// with its temporary output
    pub async fn task_completed(&self, request: TaskCompletedRequest) -> TaskCompletedResponse {
        let outcome = self
            .state
            .write()
            .await
            .record_completion(&request, now_ms());

        self.fire_cancels(outcome.cancels);

        TaskCompletedResponse {
            action: outcome.action,
        }
    }

    // ---- inspection ----

    /// Snapshot of a job's tasks and attempts
    pub async fn inspect_tasks(&self, job_id: JobId) -> Vec<crate::scheduler::task::Task> {
        self.state.read().await.tasks_for_job(job_id)
    }

    /// Snapshot of one worker's registry entry
    pub async fn inspect_worker(
        &self,
        worker_id: WorkerId,
    ) -> Option<crate::scheduler::worker_registry::WorkerEntry> {
        self.state.read().await.worker(worker_id).cloned()
    }

    // ---- dispatch ----

    /// Drain and send every dispatchable assignment; returns the number sent
    pub async fn dispatch_once(&self) -> usize {
        let assignments = self.state.write().await.next_assignments(now_ms());
        let count = assignments.len();

        for assignment in assignments {
            let state = Arc::clone(&self.state);
            let transport = Arc::clone(&self.transport);
            tokio::spawn(send_assignment(state, transport, assignment));
        }

        count
    }

    /// Best-effort immediate cancels; the heartbeat reply is the reliable path
    pub(crate) fn fire_cancels(&self, cancels: Vec<CancelDirective>) {
        for cancel in cancels {
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(e) = transport.cancel(&cancel.endpoint, cancel.attempt_id).await {
                    debug!(
                        "Immediate cancel failed (heartbeat will retry): attempt={}, error={}",
                        cancel.attempt_id, e
                    );
                }
            });
        }
    }

    /// Delete temporaries older than `tmp_gc_age`
    pub async fn gc_temporaries(&self) -> usize {
        let max_age = Duration::from_secs(self.config.tmp_gc_age_secs);
        let blobs = match self.store.list("").await {
            Ok(blobs) => blobs,
            Err(e) => {
                warn!("GC listing failed: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for blob in blobs.into_iter().filter(|b| paths::is_tmp(b)) {
            match self.store.modified_age(&blob).await {
                Ok(age) if age > max_age => {
                    if self.store.delete(&blob).await.is_ok() {
                        debug!("GC removed stale temporary: {}", blob);
                        removed += 1;
                    }
                }
                _ => {}
            }
        }

        removed
    }
}

/// Send one assignment to its worker; failures time the attempt out so the
/// task is re-dispatched elsewhere
async fn send_assignment(
    state: Arc<RwLock<SchedulerState>>,
    transport: Arc<dyn TaskTransport>,
    assignment: Assignment,
) {
    let result = match assignment.task_id.kind {
        TaskKind::Map => {
            transport
                .execute_map(
                    &assignment.endpoint,
                    ExecuteMapRequest {
                        job_id: assignment.task_id.job_id,
                        task_index: assignment.task_id.index,
                        attempt_id: assignment.attempt_id,
                        input_path: assignment.input_path.clone(),
                        split_start: assignment.split_start,
                        split_end: assignment.split_end,
                        mapper_ref: assignment.mapper_ref.clone(),
                        num_reduces: assignment.num_reduces,
                    },
                )
                .await
        }
        TaskKind::Reduce => {
            transport
                .execute_reduce(
                    &assignment.endpoint,
                    ExecuteReduceRequest {
                        job_id: assignment.task_id.job_id,
                        task_index: assignment.task_id.index,
                        attempt_id: assignment.attempt_id,
                        num_maps: assignment.num_maps,
                        reducer_ref: assignment.reducer_ref.clone(),
                        output_path: assignment.output_path.clone(),
                    },
                )
                .await
        }
    };

    if let Err(e) = result {
        warn!(
            "Dispatch failed: task={}, worker={}, error={}",
            assignment.task_id, assignment.worker_id, e
        );
        state
            .write()
            .await
            .dispatch_failed(assignment.attempt_id, now_ms());
    }
}

/// Dispatch loop
async fn run_dispatcher(scheduler: Arc<Scheduler>) {
    let interval = scheduler.config.dispatch_interval();
    loop {
        let dispatched = scheduler.dispatch_once().await;
        if dispatched > 0 {
            debug!("Dispatched {} assignments", dispatched);
        }
        sleep(interval).await;
    }
}

/// Temporary-blob GC loop
async fn run_tmp_gc(scheduler: Arc<Scheduler>) {
    let period = Duration::from_secs((scheduler.config.tmp_gc_age_secs / 4).max(60));
    loop {
        sleep(period).await;
        let removed = scheduler.gc_temporaries().await;
        if removed > 0 {
            info!("GC removed {} stale temporaries", removed);
        }
    }
}
