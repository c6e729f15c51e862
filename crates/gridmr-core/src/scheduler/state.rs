//! Authoritative scheduler state
//!
//! All job, task and worker bookkeeping lives here, owned by a single
//! structure. Callers hold it behind one coarse lock, so every mutation
//! (submission, dispatch, completion, heartbeat, sweep, straggler pass) is
//! serialised, which is what makes the commit race deterministic: the first
//! Success to reach `record_completion` wins, everything later is redundant.
//!
//! Nothing in this module performs I/O. Dispatch RPCs and blob store calls
//! happen in [`super::dispatch`] outside the lock.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CompletionAction, JobStatusResponse, TaskCompletedRequest, TaskCounts,
};
use crate::scheduler::job::{Job, JobId, JobPhase, JobSpec};
use crate::scheduler::task::{AttemptId, AttemptOutcome, Task, TaskId, TaskKind, TaskState};
use crate::scheduler::worker_registry::{Liveness, WorkerEntry, WorkerId};

/// A dispatch decision drained from the state under the lock
///
/// Carries everything the transport needs so no further state access is
/// required while the RPC is in progress.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub attempt_id: AttemptId,
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub endpoint: String,
    pub is_backup: bool,
    pub input_path: String,
    pub output_path: String,
    pub mapper_ref: String,
    pub reducer_ref: String,
    pub num_maps: u32,
    pub num_reduces: u32,
    pub split_start: u64,
    pub split_end: u64,
}

/// Best-effort immediate cancel to fire after the lock is released
#[derive(Debug, Clone)]
pub struct CancelDirective {
    pub endpoint: String,
    pub attempt_id: AttemptId,
}

/// Result of recording a completion report
#[derive(Debug)]
pub struct CompletionOutcome {
    /// Instruction returned to the reporting worker
    pub action: CompletionAction,

    /// Losing attempts to cancel immediately
    pub cancels: Vec<CancelDirective>,
}

/// An attempt younger than this is not "forgotten" when absent from a
/// heartbeat: it may have been dispatched after the worker snapshotted its
/// in-flight set
const DISPATCH_GRACE_MS: u64 = 1_000;

/// The scheduler's entire mutable state
pub struct SchedulerState {
    /// Dispatches per task before the task and its job fail
    max_attempts: u32,

    jobs: HashMap<JobId, Job>,

    tasks: HashMap<TaskId, Task>,

    workers: HashMap<WorkerId, WorkerEntry>,

    /// Attempt id -> owning task, for completion and heartbeat lookups
    attempt_index: HashMap<AttemptId, TaskId>,

    /// Per-job FIFO ready queues
    ready: HashMap<JobId, VecDeque<TaskId>>,

    /// Jobs with ready work, rotated round-robin so late arrivals never starve
    rotation: VecDeque<JobId>,

    /// Speculative attempts waiting for a distinct worker; served before
    /// pending tasks since they unblock nearly-complete jobs
    backup_queue: VecDeque<TaskId>,
}

impl SchedulerState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            jobs: HashMap::new(),
            tasks: HashMap::new(),
            workers: HashMap::new(),
            attempt_index: HashMap::new(),
            ready: HashMap::new(),
            rotation: VecDeque::new(),
            backup_queue: VecDeque::new(),
        }
    }

    // ---- submission ----

    /// Materialise a validated job: M map tasks over the input's line ranges
    /// plus R reduce tasks, map tasks enqueued immediately
    pub fn admit_job(&mut self, spec: JobSpec, line_count: u64, now_ms: i64) -> JobId {
        let job = Job::new(spec, now_ms);
        let job_id = job.id;

        for index in 0..job.spec.num_maps {
            let split = job.spec.split_range(index, line_count);
            let task = Task::new_map(job_id, index, split);
            self.tasks.insert(task.id, task);
        }
        for index in 0..job.spec.num_reduces {
            let task = Task::new_reduce(job_id, index);
            self.tasks.insert(task.id, task);
        }

        let queue: VecDeque<TaskId> = (0..job.spec.num_maps)
            .map(|index| TaskId::new(job_id, TaskKind::Map, index))
            .collect();
        self.ready.insert(job_id, queue);
        self.rotation.push_back(job_id);

        info!(
            "Admitted job: id={}, input={}, M={}, R={}, lines={}",
            job_id, job.spec.input_path, job.spec.num_maps, job.spec.num_reduces, line_count
        );

        self.jobs.insert(job_id, job);
        job_id
    }

    // ---- workers ----

    /// Register a worker and return its id
    pub fn register_worker(&mut self, endpoint: &str, capacity: usize, now_ms: i64) -> WorkerId {
        let worker = WorkerEntry::new(endpoint, capacity, now_ms);
        let worker_id = worker.id;
        info!(
            "Registered worker: id={}, endpoint={}, capacity={}",
            worker_id, endpoint, worker.capacity
        );
        self.workers.insert(worker_id, worker);
        worker_id
    }

    /// Reconcile a heartbeat and return the attempt ids the worker must kill
    ///
    /// Ids only the scheduler knows are attempts the worker has forgotten:
    /// they are cancelled and their tasks requeued unless already committed.
    /// Ids only the worker knows are returned so it kills them.
    pub fn reconcile_heartbeat(
        &mut self,
        worker_id: WorkerId,
        reported: &[AttemptId],
        now_ms: i64,
    ) -> Result<Vec<AttemptId>> {
        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or_else(|| Error::not_found(format!("unknown worker {}", worker_id)))?;

        if worker.liveness == Liveness::Dead {
            return Err(Error::not_found(format!(
                "worker {} was declared dead; re-register",
                worker_id
            )));
        }

        worker.touch(now_ms);

        let reported_set: HashSet<AttemptId> = reported.iter().copied().collect();
        let known: HashSet<AttemptId> = worker.in_flight.clone();

        let mut cancellations: Vec<AttemptId> = reported_set
            .difference(&known)
            .copied()
            .collect();
        cancellations.extend(worker.drain_cancellations());
        cancellations.retain({
            let mut seen = HashSet::new();
            move |id| seen.insert(*id)
        });

        let forgotten: Vec<AttemptId> = known.difference(&reported_set).copied().collect();
        for attempt_id in forgotten {
            let in_dispatch_window = self
                .attempt_index
                .get(&attempt_id)
                .and_then(|task_id| self.tasks.get(task_id))
                .and_then(|task| task.attempt(attempt_id))
                .map(|attempt| attempt.elapsed_ms(now_ms) < DISPATCH_GRACE_MS)
                .unwrap_or(false);
            if in_dispatch_window {
                continue;
            }

            warn!(
                "Worker dropped attempt: worker={}, attempt={}",
                worker_id, attempt_id
            );
            self.abandon_attempt(attempt_id, AttemptOutcome::Cancelled, now_ms);
        }

        Ok(cancellations)
    }

    /// Sweep worker liveness, timing out everything held by dead workers
    ///
    /// Also degrades workers that have sat on a cancellation request past
    /// `cancel_grace_ms` without answering.
    pub fn sweep_workers(
        &mut self,
        now_ms: i64,
        heartbeat_timeout_ms: u64,
        dead_timeout_ms: u64,
        cancel_grace_ms: u64,
    ) {
        let worker_ids: Vec<WorkerId> = self.workers.keys().copied().collect();

        for worker_id in worker_ids {
            let (silent, liveness) = {
                let worker = &self.workers[&worker_id];
                (worker.silent_for_ms(now_ms), worker.liveness)
            };

            if liveness == Liveness::Dead {
                continue;
            }

            if silent > dead_timeout_ms {
                warn!(
                    "Worker dead: id={}, silent_ms={}",
                    worker_id, silent
                );
                let worker = self.workers.get_mut(&worker_id).unwrap();
                worker.liveness = Liveness::Dead;
                let orphaned: Vec<AttemptId> = worker.in_flight.drain().collect();

                for attempt_id in orphaned {
                    self.abandon_attempt(attempt_id, AttemptOutcome::TimedOut, now_ms);
                }
            } else if silent > heartbeat_timeout_ms && liveness == Liveness::Alive {
                debug!(
                    "Worker suspect: id={}, silent_ms={}",
                    worker_id, silent
                );
                self.workers.get_mut(&worker_id).unwrap().liveness = Liveness::Suspect;
            }
        }

        // Workers ignoring a cancellation past the grace period
        let stalled: Vec<WorkerId> = self
            .tasks
            .values()
            .flat_map(|t| t.in_flight())
            .filter(|a| {
                a.cancel_requested_at
                    .map(|requested| now_ms - requested > cancel_grace_ms as i64)
                    .unwrap_or(false)
            })
            .map(|a| a.worker_id)
            .collect();

        for worker_id in stalled {
            if let Some(worker) = self.workers.get_mut(&worker_id) {
                if worker.liveness == Liveness::Alive {
                    warn!(
                        "Worker ignored cancellation past grace: id={}",
                        worker_id
                    );
                    worker.liveness = Liveness::Suspect;
                }
            }
        }
    }

    // ---- dispatch ----

    /// Drain everything dispatchable right now
    ///
    /// Backups go first; then per-job FIFO queues are served round-robin
    /// across jobs. Stops once no worker has a spare slot.
    pub fn next_assignments(&mut self, now_ms: i64) -> Vec<Assignment> {
        let mut assignments = Vec::new();

        // Speculative attempts, each pinned to a worker distinct from every
        // in-flight attempt of its task; deferred when none qualifies.
        let requested: Vec<TaskId> = self.backup_queue.drain(..).collect();
        for task_id in requested {
            if !self.backup_still_wanted(task_id) {
                continue;
            }
            let exclude: Vec<WorkerId> = self.tasks[&task_id]
                .in_flight()
                .map(|a| a.worker_id)
                .collect();
            match self.pick_worker(&exclude) {
                Some(worker_id) => {
                    assignments.push(self.begin_dispatch(task_id, worker_id, true, now_ms));
                }
                None => self.backup_queue.push_back(task_id),
            }
        }

        // Pending tasks, round-robin across jobs
        let mut exhausted = false;
        while !exhausted {
            let Some(job_id) = self.rotation.pop_front() else {
                break;
            };

            let job_active = self.jobs.get(&job_id).map(|j| j.is_active()).unwrap_or(false);
            if !job_active {
                self.ready.remove(&job_id);
                continue;
            }

            let Some(task_id) = self.ready.get_mut(&job_id).and_then(|q| q.pop_front()) else {
                continue;
            };

            let dispatchable = self
                .tasks
                .get(&task_id)
                .map(|t| t.state == TaskState::Pending)
                .unwrap_or(false);
            if !dispatchable {
                // Stale queue entry; keep rotating this job
                self.rotation.push_front(job_id);
                continue;
            }

            match self.pick_worker(&[]) {
                Some(worker_id) => {
                    assignments.push(self.begin_dispatch(task_id, worker_id, false, now_ms));
                    if self.ready.get(&job_id).map(|q| !q.is_empty()).unwrap_or(false) {
                        self.rotation.push_back(job_id);
                    }
                }
                None => {
                    // No capacity anywhere; restore and stop
                    self.ready.get_mut(&job_id).unwrap().push_front(task_id);
                    self.rotation.push_front(job_id);
                    exhausted = true;
                }
            }
        }

        assignments
    }

    /// The dispatch RPC itself failed; treat like a timed-out attempt
    pub fn dispatch_failed(&mut self, attempt_id: AttemptId, now_ms: i64) {
        self.abandon_attempt(attempt_id, AttemptOutcome::TimedOut, now_ms);
    }

    fn backup_still_wanted(&self, task_id: TaskId) -> bool {
        let Some(task) = self.tasks.get(&task_id) else {
            return false;
        };
        let job_active = self
            .jobs
            .get(&task_id.job_id)
            .map(|j| j.is_active() && j.phase.task_kind() == Some(task_id.kind))
            .unwrap_or(false);

        job_active
            && task.state == TaskState::Running
            && !task.has_backup_in_flight()
            && task.in_flight_count() == 1
    }

    /// Any Alive worker with a spare slot, excluding the given ids; prefers
    /// the most idle so load spreads
    fn pick_worker(&self, exclude: &[WorkerId]) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.is_dispatchable() && !exclude.contains(&w.id))
            .max_by_key(|w| (w.spare_capacity(), w.id))
            .map(|w| w.id)
    }

    fn begin_dispatch(
        &mut self,
        task_id: TaskId,
        worker_id: WorkerId,
        is_backup: bool,
        now_ms: i64,
    ) -> Assignment {
        let task = self.tasks.get_mut(&task_id).unwrap();
        let attempt_id = task.begin_attempt(worker_id, is_backup, now_ms);
        let (split_start, split_end) = (task.split_start, task.split_end);

        self.attempt_index.insert(attempt_id, task_id);

        let worker = self.workers.get_mut(&worker_id).unwrap();
        worker.in_flight.insert(attempt_id);
        let endpoint = worker.endpoint.clone();

        let job = &self.jobs[&task_id.job_id];

        debug!(
            "Dispatching attempt: task={}, attempt={}, worker={}, backup={}",
            task_id, attempt_id, worker_id, is_backup
        );

        Assignment {
            attempt_id,
            task_id,
            worker_id,
            endpoint,
            is_backup,
            input_path: job.spec.input_path.clone(),
            output_path: job.spec.output_path.clone(),
            mapper_ref: job.spec.mapper_ref.clone(),
            reducer_ref: job.spec.reducer_ref.clone(),
            num_maps: job.spec.num_maps,
            num_reduces: job.spec.num_reduces,
            split_start,
            split_end,
        }
    }

    // ---- completion / commit protocol ----

    /// Record a completion report and decide what the worker does with its
    /// temporary output
    ///
    /// The first Success for a Running task commits it; every later Success
    /// is recorded redundant and discarded. Failures requeue the task only
    /// once no sibling attempt remains in flight.
    pub fn record_completion(
        &mut self,
        report: &TaskCompletedRequest,
        now_ms: i64,
    ) -> CompletionOutcome {
        let Some(task_id) = self.attempt_index.get(&report.attempt_id).copied() else {
            warn!("Completion for unknown attempt: {}", report.attempt_id);
            return CompletionOutcome {
                action: CompletionAction::Discard,
                cancels: Vec::new(),
            };
        };

        self.release_from_worker(report.attempt_id);

        match report.outcome {
            AttemptOutcome::Success => self.record_success(task_id, report, now_ms),
            AttemptOutcome::Error | AttemptOutcome::Cancelled | AttemptOutcome::TimedOut => {
                self.record_failure(task_id, report, now_ms)
            }
            AttemptOutcome::InFlight => {
                warn!(
                    "Completion report with in-flight outcome: attempt={}",
                    report.attempt_id
                );
                CompletionOutcome {
                    action: CompletionAction::Ack,
                    cancels: Vec::new(),
                }
            }
        }
    }

    fn record_success(
        &mut self,
        task_id: TaskId,
        report: &TaskCompletedRequest,
        now_ms: i64,
    ) -> CompletionOutcome {
        let task = self.tasks.get_mut(&task_id).unwrap();

        if task.state == TaskState::Committed {
            // Lost the race: accept, record redundant, discard output
            if let Some(attempt) = task.attempt_mut(report.attempt_id) {
                attempt.finish(AttemptOutcome::Cancelled, now_ms);
                attempt.redundant = true;
            }
            info!(
                "Redundant success: task={}, attempt={}",
                task_id, report.attempt_id
            );
            return CompletionOutcome {
                action: CompletionAction::Discard,
                cancels: Vec::new(),
            };
        }

        if task.state == TaskState::Failed {
            if let Some(attempt) = task.attempt_mut(report.attempt_id) {
                attempt.finish(AttemptOutcome::Cancelled, now_ms);
            }
            return CompletionOutcome {
                action: CompletionAction::Discard,
                cancels: Vec::new(),
            };
        }

        // Committing attempt
        let duration_ms = task
            .attempt(report.attempt_id)
            .map(|a| a.elapsed_ms(now_ms))
            .unwrap_or(0);
        task.mark_committed(report.attempt_id, now_ms);

        let losers: Vec<(AttemptId, WorkerId)> = task
            .in_flight()
            .map(|a| (a.id, a.worker_id))
            .collect();

        let label = task_id.label();
        let kind = task_id.kind;

        info!(
            "Committed task: task={}, attempt={}, duration_ms={}, records_out={}",
            task_id, report.attempt_id, duration_ms, report.stats.records_out
        );

        if let Some(job) = self.jobs.get_mut(&task_id.job_id) {
            job.record_commit(kind, duration_ms, label);
        }

        let mut cancels = Vec::new();
        for (attempt_id, worker_id) in &losers {
            if let Some(worker) = self.workers.get_mut(worker_id) {
                worker.push_cancellation(*attempt_id);
                cancels.push(CancelDirective {
                    endpoint: worker.endpoint.clone(),
                    attempt_id: *attempt_id,
                });
            }
        }
        let task = self.tasks.get_mut(&task_id).unwrap();
        for (attempt_id, _) in &losers {
            if let Some(attempt) = task.attempt_mut(*attempt_id) {
                attempt.cancel_requested_at = Some(now_ms);
            }
        }

        self.advance_phase(task_id.job_id);

        CompletionOutcome {
            action: CompletionAction::Commit,
            cancels,
        }
    }

    fn record_failure(
        &mut self,
        task_id: TaskId,
        report: &TaskCompletedRequest,
        now_ms: i64,
    ) -> CompletionOutcome {
        let task = self.tasks.get_mut(&task_id).unwrap();

        if let Some(attempt) = task.attempt_mut(report.attempt_id) {
            attempt.finish(report.outcome, now_ms);
        }

        if report.outcome == AttemptOutcome::Error {
            if let Some(message) = &report.error_message {
                if let Some(job) = self.jobs.get_mut(&task_id.job_id) {
                    job.note_error(message.clone());
                }
            }
        }
        if let Some(job) = self.jobs.get_mut(&task_id.job_id) {
            job.failed_attempts += 1;
        }

        let task = &self.tasks[&task_id];
        if !task.state.is_terminal() && task.in_flight_count() == 0 {
            let message = report
                .error_message
                .clone()
                .unwrap_or_else(|| format!("attempt finished with {:?}", report.outcome));
            self.requeue_or_fail(task_id, &message, now_ms);
        }

        CompletionOutcome {
            action: CompletionAction::Discard,
            cancels: Vec::new(),
        }
    }

    /// Shared path for attempts that will never report: dead workers,
    /// forgotten heartbeat entries, failed dispatch RPCs, forced deadlines
    fn abandon_attempt(&mut self, attempt_id: AttemptId, outcome: AttemptOutcome, now_ms: i64) {
        let Some(task_id) = self.attempt_index.get(&attempt_id).copied() else {
            return;
        };

        self.release_from_worker(attempt_id);

        let task = self.tasks.get_mut(&task_id).unwrap();
        let was_in_flight = task
            .attempt(attempt_id)
            .map(|a| a.outcome == AttemptOutcome::InFlight)
            .unwrap_or(false);
        if !was_in_flight {
            return;
        }
        if let Some(attempt) = task.attempt_mut(attempt_id) {
            attempt.finish(outcome, now_ms);
        }
        if let Some(job) = self.jobs.get_mut(&task_id.job_id) {
            job.failed_attempts += 1;
        }

        let task = &self.tasks[&task_id];
        if !task.state.is_terminal() && task.in_flight_count() == 0 {
            self.requeue_or_fail(task_id, "worker lost before completion", now_ms);
        }
    }

    fn release_from_worker(&mut self, attempt_id: AttemptId) {
        if let Some(task_id) = self.attempt_index.get(&attempt_id) {
            if let Some(worker_id) = self
                .tasks
                .get(task_id)
                .and_then(|t| t.attempt(attempt_id))
                .map(|a| a.worker_id)
            {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.in_flight.remove(&attempt_id);
                }
            }
        }
    }

    /// Return a task to the ready queue, or fail its whole job once
    /// `max_attempts` dispatches have been burned
    fn requeue_or_fail(&mut self, task_id: TaskId, message: &str, now_ms: i64) {
        let task = self.tasks.get_mut(&task_id).unwrap();

        if task.dispatch_count() >= self.max_attempts {
            let reason = format!(
                "task {} failed after {} attempts: {}",
                task_id,
                task.dispatch_count(),
                message
            );
            warn!("{}", reason);
            self.fail_job(task_id.job_id, &reason, now_ms);
            return;
        }

        task.state = TaskState::Pending;
        debug!(
            "Requeued task: task={}, dispatches={}",
            task_id,
            task.dispatch_count()
        );
        self.enqueue_task(task_id);
    }

    /// Fail a job and everything of it that has not committed
    fn fail_job(&mut self, job_id: JobId, message: &str, now_ms: i64) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.phase == JobPhase::Failed {
            return;
        }
        job.mark_failed(message);

        let task_ids: Vec<TaskId> = self
            .tasks
            .keys()
            .filter(|id| id.job_id == job_id)
            .copied()
            .collect();

        for task_id in task_ids {
            let task = self.tasks.get_mut(&task_id).unwrap();
            if task.state == TaskState::Committed {
                continue;
            }

            let live: Vec<(AttemptId, WorkerId)> =
                task.in_flight().map(|a| (a.id, a.worker_id)).collect();
            task.state = TaskState::Failed;
            for (attempt_id, _) in &live {
                if let Some(attempt) = task.attempt_mut(*attempt_id) {
                    attempt.cancel_requested_at = Some(now_ms);
                }
            }

            for (attempt_id, worker_id) in live {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.push_cancellation(attempt_id);
                }
            }
        }

        self.ready.remove(&job_id);
        self.backup_queue.retain(|id| id.job_id != job_id);

        warn!("Job failed: id={}, reason={}", job_id, message);
    }

    fn enqueue_task(&mut self, task_id: TaskId) {
        let queue = self.ready.entry(task_id.job_id).or_default();
        if !queue.contains(&task_id) {
            queue.push_back(task_id);
        }
        if !self.rotation.contains(&task_id.job_id) {
            self.rotation.push_back(task_id.job_id);
        }
    }

    /// Move the job forward when its current phase has fully committed
    fn advance_phase(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get(&job_id) else {
            return;
        };

        match job.phase {
            JobPhase::MapPhase => {
                let counts = self.count_tasks(job_id, TaskKind::Map);
                if counts.committed == self.jobs[&job_id].spec.num_maps {
                    let job = self.jobs.get_mut(&job_id).unwrap();
                    job.mark_reduce_phase();
                    let num_reduces = job.spec.num_reduces;
                    info!("Job entering reduce phase: id={}", job_id);

                    for index in 0..num_reduces {
                        self.enqueue_task(TaskId::new(job_id, TaskKind::Reduce, index));
                    }
                }
            }
            JobPhase::ReducePhase => {
                let counts = self.count_tasks(job_id, TaskKind::Reduce);
                if counts.committed == self.jobs[&job_id].spec.num_reduces {
                    self.jobs.get_mut(&job_id).unwrap().mark_completed();
                    self.ready.remove(&job_id);
                    info!("Job completed: id={}", job_id);
                }
            }
            JobPhase::Completed | JobPhase::Failed => {}
        }
    }

    // ---- straggler monitor ----

    /// Queue a speculative attempt for a task
    pub fn request_backup(&mut self, task_id: TaskId) {
        if !self.backup_queue.contains(&task_id) && self.backup_still_wanted(task_id) {
            info!("Backup requested: task={}", task_id);
            self.backup_queue.push_back(task_id);
        }
    }

    /// One monitor tick: request backups for stragglers and force-timeout
    /// attempts past their deadline
    ///
    /// Jobs whose current phase has committed less than `min_baseline_ratio`
    /// of its tasks are skipped: no baseline, no speculation.
    pub fn straggler_pass(
        &mut self,
        now_ms: i64,
        threshold: f64,
        min_baseline_ratio: f64,
        deadline_factor: f64,
    ) -> Vec<CancelDirective> {
        let mut cancels = Vec::new();

        let job_ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.is_active())
            .map(|j| j.id)
            .collect();

        for job_id in job_ids {
            let job = &self.jobs[&job_id];
            let Some(kind) = job.phase.task_kind() else {
                continue;
            };

            let total = match kind {
                TaskKind::Map => job.spec.num_maps,
                TaskKind::Reduce => job.spec.num_reduces,
            } as f64;
            let durations = job.completion_stats.durations_for(kind);

            if (durations.len() as f64) / total < min_baseline_ratio {
                continue;
            }
            let Some(median) = crate::scheduler::job::median_ms(durations) else {
                continue;
            };
            // Sub-millisecond medians would trip every deadline instantly
            let median = median.max(1);

            let straggler_cutoff_ms = (threshold * median as f64) as u64;
            let deadline_ms = (deadline_factor * median as f64) as u64;

            let task_ids: Vec<TaskId> = self
                .tasks
                .values()
                .filter(|t| {
                    t.id.job_id == job_id && t.id.kind == kind && t.state == TaskState::Running
                })
                .map(|t| t.id)
                .collect();

            for task_id in task_ids {
                // Deadline enforcement first: an expired attempt no longer
                // counts as the task's live copy
                let expired: Vec<(AttemptId, WorkerId)> = self.tasks[&task_id]
                    .in_flight()
                    .filter(|a| a.elapsed_ms(now_ms) > deadline_ms)
                    .map(|a| (a.id, a.worker_id))
                    .collect();

                for (attempt_id, worker_id) in expired {
                    warn!(
                        "Attempt deadline exceeded: task={}, attempt={}, deadline_ms={}",
                        task_id, attempt_id, deadline_ms
                    );
                    if let Some(worker) = self.workers.get_mut(&worker_id) {
                        worker.push_cancellation(attempt_id);
                        cancels.push(CancelDirective {
                            endpoint: worker.endpoint.clone(),
                            attempt_id,
                        });
                    }
                    self.abandon_attempt(attempt_id, AttemptOutcome::TimedOut, now_ms);
                }

                let task = &self.tasks[&task_id];
                if task.state != TaskState::Running
                    || task.has_backup_in_flight()
                    || task.in_flight_count() != 1
                {
                    continue;
                }

                let is_straggling = task
                    .in_flight()
                    .any(|a| a.elapsed_ms(now_ms) > straggler_cutoff_ms);
                if is_straggling {
                    self.request_backup(task_id);
                }
            }
        }

        cancels
    }

    // ---- inspection ----

    /// Status snapshot for one job
    pub fn job_status(&self, job_id: JobId) -> Result<JobStatusResponse> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| Error::not_found(format!("unknown job {}", job_id)))?;

        Ok(JobStatusResponse {
            job_id,
            phase: job.phase,
            num_maps: job.spec.num_maps,
            num_reduces: job.spec.num_reduces,
            map_tasks: self.count_tasks(job_id, TaskKind::Map),
            reduce_tasks: self.count_tasks(job_id, TaskKind::Reduce),
            failed_attempts: job.failed_attempts,
            error_message: job.error_message.clone(),
            completion_sequence: job.completion_stats.completion_sequence.clone(),
        })
    }

    fn count_tasks(&self, job_id: JobId, kind: TaskKind) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.tasks.values() {
            if task.id.job_id != job_id || task.id.kind != kind {
                continue;
            }
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Committed => counts.committed += 1,
                TaskState::Failed => {}
            }
        }
        counts
    }

    /// Look up a job
    pub fn job(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    /// Look up a task
    pub fn task(&self, task_id: &TaskId) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Look up a worker
    pub fn worker(&self, worker_id: WorkerId) -> Option<&WorkerEntry> {
        self.workers.get(&worker_id)
    }

    /// Ids of all jobs, in no particular order
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    /// Snapshot of every task of a job, for inspection endpoints
    pub fn tasks_for_job(&self, job_id: JobId) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.id.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.id.kind != TaskKind::Map, t.id.index));
        tasks
    }
}
