//! End-to-end pipeline scenarios over an in-process transport
//!
//! A real scheduler and real task executors share a tempdir-backed blob
//! store; only the HTTP layer is replaced by an in-process transport that
//! spawns attempts directly. Workers can be flagged unreachable (dispatch
//! refused) or hung (dispatch accepted, nothing ever runs) to exercise the
//! failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::time::sleep;

use gridmr_core::blobstore::{BlobStore, LocalBlobStore};
use gridmr_core::config::{Config, WorkerConfig};
use gridmr_core::error::Result;
use gridmr_core::protocol::{
    ExecuteMapRequest, ExecuteReduceRequest, HeartbeatRequest, JobStatusResponse,
    RegisterWorkerRequest, SubmitJobRequest, TaskCompletedRequest, TaskCompletedResponse,
};
use gridmr_core::scheduler::job::{JobId, JobPhase};
use gridmr_core::scheduler::task::AttemptOutcome;
use gridmr_core::scheduler::worker_registry::{Liveness, WorkerId};
use gridmr_core::scheduler::{Scheduler, TaskTransport};
use gridmr_core::worker::{
    execute_map_attempt, execute_reduce_attempt, CompletionReporter, TaskExecutor,
};
use gridmr_core::Error;

struct InlineWorker {
    id: WorkerId,
    executor: Arc<TaskExecutor>,
    /// Refuse dispatch RPCs outright
    unreachable: AtomicBool,
    /// Accept dispatch RPCs but never run anything
    hung: AtomicBool,
}

/// Reports completions straight into the scheduler
struct InlineReporter(Arc<Scheduler>);

#[async_trait]
impl CompletionReporter for InlineReporter {
    async fn task_completed(&self, request: &TaskCompletedRequest) -> Result<TaskCompletedResponse> {
        Ok(self.0.task_completed(request.clone()).await)
    }
}

#[derive(Default)]
struct InlineTransport {
    scheduler: OnceCell<Arc<Scheduler>>,
    workers: Mutex<HashMap<String, Arc<InlineWorker>>>,
}

impl InlineTransport {
    fn worker(&self, endpoint: &str) -> Result<Arc<InlineWorker>> {
        let workers = self.workers.lock().unwrap();
        let worker = workers
            .get(endpoint)
            .ok_or_else(|| Error::network(format!("no route to {}", endpoint)))?;
        if worker.unreachable.load(Ordering::SeqCst) {
            return Err(Error::network(format!("connection refused: {}", endpoint)));
        }
        Ok(worker.clone())
    }

    fn reporter(&self) -> Arc<dyn CompletionReporter> {
        Arc::new(InlineReporter(self.scheduler.get().unwrap().clone()))
    }
}

#[async_trait]
impl TaskTransport for InlineTransport {
    async fn execute_map(&self, endpoint: &str, request: ExecuteMapRequest) -> Result<()> {
        let worker = self.worker(endpoint)?;
        if worker.hung.load(Ordering::SeqCst) {
            return Ok(());
        }
        let token = worker.executor.try_begin(request.attempt_id).await?;
        let reporter = self.reporter();
        let executor = worker.executor.clone();
        let worker_id = worker.id;
        tokio::spawn(execute_map_attempt(executor, reporter, worker_id, request, token));
        Ok(())
    }

    async fn execute_reduce(&self, endpoint: &str, request: ExecuteReduceRequest) -> Result<()> {
        let worker = self.worker(endpoint)?;
        if worker.hung.load(Ordering::SeqCst) {
            return Ok(());
        }
        let token = worker.executor.try_begin(request.attempt_id).await?;
        let reporter = self.reporter();
        let executor = worker.executor.clone();
        let worker_id = worker.id;
        tokio::spawn(execute_reduce_attempt(executor, reporter, worker_id, request, token));
        Ok(())
    }

    async fn cancel(&self, endpoint: &str, attempt_id: gridmr_core::scheduler::AttemptId) -> Result<()> {
        let worker = self.worker(endpoint)?;
        worker.executor.cancel(attempt_id).await;
        Ok(())
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    transport: Arc<InlineTransport>,
    store: Arc<LocalBlobStore>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new(config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let transport = Arc::new(InlineTransport::default());
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            transport.clone(),
            &config,
        ));
        transport.scheduler.set(scheduler.clone()).ok().unwrap();

        Self {
            scheduler,
            transport,
            store,
            _dir: dir,
        }
    }

    async fn add_worker(&self, endpoint: &str, worker_config: WorkerConfig) -> Arc<InlineWorker> {
        let capacity = worker_config.capacity;
        let executor = Arc::new(TaskExecutor::new(self.store.clone(), worker_config));

        let id = self
            .scheduler
            .register_worker(RegisterWorkerRequest {
                endpoint: endpoint.to_string(),
                capacity,
            })
            .await;

        let worker = Arc::new(InlineWorker {
            id,
            executor,
            unreachable: AtomicBool::new(false),
            hung: AtomicBool::new(false),
        });
        self.transport
            .workers
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), worker.clone());
        worker
    }

    async fn submit_wordcount(&self, input: &str, output: &str, m: u32, r: u32) -> JobId {
        self.scheduler
            .submit_job(SubmitJobRequest {
                input_path: input.to_string(),
                output_path: output.to_string(),
                mapper_ref: "wordcount".to_string(),
                reducer_ref: "wordcount".to_string(),
                num_maps: m,
                num_reduces: r,
            })
            .await
            .unwrap()
    }

    /// Drive dispatch manually until the job reaches a terminal phase
    async fn run_to_terminal(&self, job_id: JobId, timeout: Duration) -> JobStatusResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.scheduler.dispatch_once().await;
            sleep(Duration::from_millis(10)).await;

            let status = self.scheduler.job_status(job_id).await.unwrap();
            if status.phase.is_terminal() {
                // The last commit instruction may still be renaming
                sleep(Duration::from_millis(250)).await;
                return status;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} did not finish: {:?}", job_id, status);
            }
        }
    }

    async fn sorted_results(&self, output_path: &str) -> Vec<String> {
        let mut lines = self
            .scheduler
            .read_results(output_path, None)
            .await
            .unwrap();
        lines.sort();
        lines
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduling.dispatch_interval_ms = 20;
    config.scheduling.sweep_interval_ms = 50;
    config.scheduling.check_interval_ms = 50;
    config
}

const WORDCOUNT_INPUT: &str = "hello world\nhello mapreduce\nworld of distributed systems\nmapreduce is powerful\nhello again\n";

const WORDCOUNT_EXPECTED: &[&str] = &[
    "again\t1",
    "distributed\t1",
    "hello\t3",
    "is\t1",
    "mapreduce\t2",
    "of\t1",
    "powerful\t1",
    "systems\t1",
    "world\t2",
];

#[tokio::test]
async fn word_count_small() {
    let harness = Harness::new(fast_config());
    harness.add_worker("inline://w1", WorkerConfig { capacity: 2, ..Default::default() }).await;
    harness.add_worker("inline://w2", WorkerConfig { capacity: 2, ..Default::default() }).await;

    harness
        .store
        .write("input/words.txt", WORDCOUNT_INPUT.as_bytes())
        .await
        .unwrap();

    let job_id = harness.submit_wordcount("input/words.txt", "out/wc", 2, 2).await;
    let status = harness.run_to_terminal(job_id, Duration::from_secs(10)).await;

    assert_eq!(status.phase, JobPhase::Completed);
    assert_eq!(status.map_tasks.committed, 2);
    assert_eq!(status.reduce_tasks.committed, 2);
    assert_eq!(status.completion_sequence.len(), 4);

    // Both canonical outputs exist; their union is the expected count set
    assert!(harness.store.exists("out/wc/reduce-0.txt").await.unwrap());
    assert!(harness.store.exists("out/wc/reduce-1.txt").await.unwrap());
    assert_eq!(harness.sorted_results("out/wc").await, WORDCOUNT_EXPECTED);

    // No temporaries survive a clean run
    let leftovers: Vec<String> = harness
        .store
        .list("")
        .await
        .unwrap()
        .into_iter()
        .filter(|b| gridmr_core::blobstore::paths::is_tmp(b))
        .collect();
    assert!(leftovers.is_empty(), "stale temporaries: {:?}", leftovers);
}

#[tokio::test]
async fn empty_input_completes_with_empty_outputs() {
    let harness = Harness::new(fast_config());
    harness.add_worker("inline://w1", WorkerConfig { capacity: 4, ..Default::default() }).await;

    harness.store.write("input/empty.txt", b"").await.unwrap();

    let job_id = harness.submit_wordcount("input/empty.txt", "out/empty", 2, 2).await;
    let status = harness.run_to_terminal(job_id, Duration::from_secs(10)).await;

    assert_eq!(status.phase, JobPhase::Completed);
    for r in 0..2 {
        let path = format!("out/empty/reduce-{}.txt", r);
        assert_eq!(harness.store.read(&path).await.unwrap(), b"");
    }
    assert!(harness.sorted_results("out/empty").await.is_empty());
}

#[tokio::test]
async fn single_map_single_reduce() {
    let harness = Harness::new(fast_config());
    harness.add_worker("inline://w1", WorkerConfig { capacity: 1, ..Default::default() }).await;

    harness
        .store
        .write("input/words.txt", WORDCOUNT_INPUT.as_bytes())
        .await
        .unwrap();

    let job_id = harness.submit_wordcount("input/words.txt", "out/single", 1, 1).await;
    let status = harness.run_to_terminal(job_id, Duration::from_secs(10)).await;

    assert_eq!(status.phase, JobPhase::Completed);
    assert_eq!(harness.sorted_results("out/single").await, WORDCOUNT_EXPECTED);
}

#[tokio::test]
async fn more_tasks_than_slots_still_completes() {
    let harness = Harness::new(fast_config());
    harness.add_worker("inline://w1", WorkerConfig { capacity: 1, ..Default::default() }).await;

    let big_input: String = (0..200)
        .map(|i| format!("line number {} with some words\n", i))
        .collect();
    harness
        .store
        .write("input/big.txt", big_input.as_bytes())
        .await
        .unwrap();

    let job_id = harness.submit_wordcount("input/big.txt", "out/big", 8, 4).await;
    let status = harness.run_to_terminal(job_id, Duration::from_secs(30)).await;

    assert_eq!(status.phase, JobPhase::Completed);

    let results = harness.sorted_results("out/big").await;
    assert!(results.contains(&"number\t200".to_string()));
    assert!(results.contains(&"words\t200".to_string()));
}

#[tokio::test]
async fn straggler_gets_backup_and_job_finishes_fast() {
    let mut config = fast_config();
    // Keep the deadline out of the way so speculation, not a forced
    // timeout, resolves the slow attempts
    config.scheduling.task_deadline_factor = 10_000.0;
    let harness = Harness::new(config);

    harness.add_worker("inline://fast", WorkerConfig { capacity: 8, ..Default::default() }).await;
    harness
        .add_worker(
            "inline://slow",
            WorkerConfig {
                capacity: 8,
                simulate_straggler: true,
                straggler_delay_ms: 30_000,
                ..Default::default()
            },
        )
        .await;

    let input: String = (0..64).map(|i| format!("word{} common filler\n", i)).collect();
    harness.store.write("input/strag.txt", input.as_bytes()).await.unwrap();

    let job_id = harness.submit_wordcount("input/strag.txt", "out/strag", 8, 2).await;

    // Run the real loops: the monitor must fire on its own
    let _handles = harness.scheduler.clone().start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let status = loop {
        let status = harness.scheduler.job_status(job_id).await.unwrap();
        if status.phase.is_terminal() {
            break status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("straggler job stuck: {:?}", status);
        }
        sleep(Duration::from_millis(20)).await;
    };

    // The job completed despite the 30s injected delay, which means backups
    // overtook the stragglers
    assert_eq!(status.phase, JobPhase::Completed);
    sleep(Duration::from_millis(250)).await;

    let tasks = harness.scheduler.inspect_tasks(job_id).await;
    let backups: usize = tasks
        .iter()
        .flat_map(|t| t.attempts.iter())
        .filter(|a| a.is_backup)
        .count();
    assert!(backups >= 1, "no speculative attempt was launched");

    // Never more than two live copies of a task
    for task in &tasks {
        assert!(task.in_flight_count() <= 2);
    }

    assert_eq!(harness.sorted_results("out/strag").await.len(), 66);
}

#[tokio::test]
async fn dead_worker_attempts_requeue_and_job_completes() {
    let mut config = fast_config();
    config.scheduling.heartbeat_timeout_ms = 200;
    config.scheduling.dead_timeout_ms = 500;
    // The sweeper, not the per-attempt deadline, is under test here
    config.scheduling.task_deadline_factor = 10_000.0;
    let harness = Harness::new(config);

    let live = harness.add_worker("inline://live", WorkerConfig { capacity: 4, ..Default::default() }).await;
    let doomed = harness
        .add_worker("inline://doomed", WorkerConfig { capacity: 4, ..Default::default() })
        .await;
    doomed.hung.store(true, Ordering::SeqCst);

    harness
        .store
        .write("input/words.txt", WORDCOUNT_INPUT.as_bytes())
        .await
        .unwrap();

    // Keep the live worker heartbeating so only the hung one dies
    let scheduler = harness.scheduler.clone();
    let live_executor = live.executor.clone();
    let live_id = live.id;
    tokio::spawn(async move {
        loop {
            let in_flight = live_executor.in_flight().await;
            let _ = scheduler
                .heartbeat(HeartbeatRequest {
                    worker_id: live_id,
                    in_flight,
                })
                .await;
            sleep(Duration::from_millis(50)).await;
        }
    });

    let job_id = harness.submit_wordcount("input/words.txt", "out/dead", 4, 2).await;
    let _handles = harness.scheduler.clone().start();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    let status = loop {
        let status = harness.scheduler.job_status(job_id).await.unwrap();
        if status.phase.is_terminal() {
            break status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job stuck after worker death: {:?}", status);
        }
        sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(status.phase, JobPhase::Completed);
    sleep(Duration::from_millis(250)).await;
    assert_eq!(harness.sorted_results("out/dead").await, WORDCOUNT_EXPECTED);

    // The hung worker was declared dead and its attempts timed out
    let entry = harness.scheduler.inspect_worker(doomed.id).await.unwrap();
    assert_eq!(entry.liveness, Liveness::Dead);
    assert!(entry.in_flight.is_empty());

    let tasks = harness.scheduler.inspect_tasks(job_id).await;
    let timed_out = tasks
        .iter()
        .flat_map(|t| t.attempts.iter())
        .filter(|a| a.outcome == AttemptOutcome::TimedOut)
        .count();
    assert!(timed_out >= 1, "no attempt was timed out by the sweeper");
}

#[tokio::test]
async fn unreachable_workers_fail_job_after_max_attempts() {
    let harness = Harness::new(fast_config());
    let worker = harness.add_worker("inline://w1", WorkerConfig { capacity: 2, ..Default::default() }).await;
    worker.unreachable.store(true, Ordering::SeqCst);

    harness
        .store
        .write("input/words.txt", WORDCOUNT_INPUT.as_bytes())
        .await
        .unwrap();

    let job_id = harness.submit_wordcount("input/words.txt", "out/unreach", 1, 1).await;
    let status = harness.run_to_terminal(job_id, Duration::from_secs(10)).await;

    assert_eq!(status.phase, JobPhase::Failed);
    assert!(status.error_message.is_some());

    // No canonical output exists for a failed job
    assert!(!harness.store.exists("out/unreach/reduce-0.txt").await.unwrap());
}

#[tokio::test]
async fn user_code_error_surfaces_after_retries() {
    let harness = Harness::new(fast_config());
    harness.add_worker("inline://w1", WorkerConfig { capacity: 2, ..Default::default() }).await;

    harness.store.write("input/x.txt", b"some line\n").await.unwrap();

    let job_id = harness
        .scheduler
        .submit_job(SubmitJobRequest {
            input_path: "input/x.txt".to_string(),
            output_path: "out/badref".to_string(),
            mapper_ref: "no-such-mapper".to_string(),
            reducer_ref: "wordcount".to_string(),
            num_maps: 1,
            num_reduces: 1,
        })
        .await
        .unwrap();

    let status = harness.run_to_terminal(job_id, Duration::from_secs(10)).await;

    assert_eq!(status.phase, JobPhase::Failed);
    let message = status.error_message.unwrap();
    assert!(message.contains("no-such-mapper"), "unexpected error: {}", message);
}

#[tokio::test]
async fn bad_submissions_are_rejected() {
    let harness = Harness::new(fast_config());

    // Missing input
    let err = harness
        .scheduler
        .submit_job(SubmitJobRequest {
            input_path: "input/missing.txt".to_string(),
            output_path: "out/x".to_string(),
            mapper_ref: "wordcount".to_string(),
            reducer_ref: "wordcount".to_string(),
            num_maps: 1,
            num_reduces: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.category(), "bad_request");

    // Zero map tasks
    harness.store.write("input/ok.txt", b"x\n").await.unwrap();
    let err = harness
        .scheduler
        .submit_job(SubmitJobRequest {
            input_path: "input/ok.txt".to_string(),
            output_path: "out/x".to_string(),
            mapper_ref: "wordcount".to_string(),
            reducer_ref: "wordcount".to_string(),
            num_maps: 0,
            num_reduces: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.category(), "bad_request");

    // Unknown job id
    let err = harness.scheduler.job_status(JobId::new_v4()).await.unwrap_err();
    assert_eq!(err.category(), "not_found");
}

#[tokio::test]
async fn concurrent_jobs_are_isolated_and_correct() {
    let harness = Harness::new(fast_config());
    harness.add_worker("inline://w1", WorkerConfig { capacity: 4, ..Default::default() }).await;
    harness.add_worker("inline://w2", WorkerConfig { capacity: 4, ..Default::default() }).await;

    harness
        .store
        .write("input/words.txt", WORDCOUNT_INPUT.as_bytes())
        .await
        .unwrap();

    let mut jobs = Vec::new();
    for i in 0..3 {
        let output = format!("out/multi-{}", i);
        jobs.push((
            harness.submit_wordcount("input/words.txt", &output, 2, 2).await,
            output,
        ));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        harness.scheduler.dispatch_once().await;
        sleep(Duration::from_millis(10)).await;

        let mut done = 0;
        for (job_id, _) in &jobs {
            let status = harness.scheduler.job_status(*job_id).await.unwrap();
            match status.phase {
                JobPhase::Completed => done += 1,
                JobPhase::Failed => panic!("job {} failed: {:?}", job_id, status.error_message),
                _ => {}
            }
        }
        if done == jobs.len() {
            sleep(Duration::from_millis(250)).await;
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("concurrent jobs did not finish");
        }
    }

    // Each job wrote its own correct, independent output tree
    for (job_id, output) in &jobs {
        assert_eq!(&harness.sorted_results(output).await, WORDCOUNT_EXPECTED);

        let intermediates = harness
            .store
            .list(&format!("intermediate/{}", job_id))
            .await
            .unwrap();
        assert_eq!(intermediates.len(), 4, "expected M x R committed partitions");
        for blob in intermediates {
            assert!(blob.starts_with(&format!("intermediate/{}", job_id)));
        }
    }
}
