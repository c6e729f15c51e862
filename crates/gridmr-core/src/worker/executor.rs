//! Task execution on a worker
//!
//! One executor per worker process. It owns the slot accounting, runs map
//! and reduce attempts against the blob store, and keeps every attempt's
//! output under a temporary path until the scheduler decides the commit.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blobstore::{paths, BlobStore};
use crate::config::WorkerConfig;
use crate::error::Error;
use crate::protocol::{
    AttemptStats, CompletionAction, ExecuteMapRequest, ExecuteReduceRequest,
};
use crate::scheduler::task::AttemptId;
use crate::worker::codec;
use crate::worker::udf::{Mapper, Reducer, UdfRegistry};

/// How long a reduce waits for a committed map partition to appear at its
/// canonical path before giving up
const PARTITION_READ_RETRIES: u32 = 25;
const PARTITION_READ_BACKOFF: Duration = Duration::from_millis(200);

/// Error types for task execution
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,

    #[error("user code error: {0}")]
    UserCode(String),

    #[error("blob store error: {0}")]
    BlobStore(String),
}

impl TaskError {
    fn from_store(err: Error) -> Self {
        TaskError::BlobStore(err.to_string())
    }

    fn from_user(err: Error) -> Self {
        TaskError::UserCode(err.to_string())
    }
}

/// One temporary artefact and the canonical path it commits to
#[derive(Debug, Clone)]
pub struct Artefact {
    pub tmp_path: String,
    pub canonical_path: String,
}

/// Result of a finished attempt, before the commit decision
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub stats: AttemptStats,
    pub artefacts: Vec<Artefact>,
}

/// Executes map and reduce attempts, one per slot
pub struct TaskExecutor {
    store: Arc<dyn BlobStore>,

    registry: UdfRegistry,

    config: WorkerConfig,

    /// Cancellation handle per running attempt
    running: Mutex<HashMap<AttemptId, CancellationToken>>,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn BlobStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            registry: UdfRegistry::new(),
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a slot for an attempt
    ///
    /// Returns the attempt's cancellation token, or `WorkerUnavailable` when
    /// every slot is busy. Re-claiming a running attempt hands back its
    /// existing token so duplicate dispatches stay harmless.
    pub async fn try_begin(&self, attempt_id: AttemptId) -> Result<CancellationToken, Error> {
        let mut running = self.running.lock().await;

        if let Some(token) = running.get(&attempt_id) {
            return Ok(token.clone());
        }
        if running.len() >= self.config.capacity {
            return Err(Error::worker_unavailable(format!(
                "all {} slots busy",
                self.config.capacity
            )));
        }

        let token = CancellationToken::new();
        running.insert(attempt_id, token.clone());
        Ok(token)
    }

    /// Release an attempt's slot
    pub async fn finish(&self, attempt_id: AttemptId) {
        self.running.lock().await.remove(&attempt_id);
    }

    /// Request cooperative cancellation; unknown or finished attempts are a
    /// no-op
    pub async fn cancel(&self, attempt_id: AttemptId) {
        if let Some(token) = self.running.lock().await.get(&attempt_id) {
            info!("Cancelling attempt: id={}", attempt_id);
            token.cancel();
        } else {
            debug!("Cancel for attempt not running: id={}", attempt_id);
        }
    }

    /// Attempts currently holding a slot, for heartbeat reports
    pub async fn in_flight(&self) -> Vec<AttemptId> {
        self.running.lock().await.keys().copied().collect()
    }

    /// Execute a map attempt
    ///
    /// Reads the assigned line range, maps each line, partitions emitted
    /// pairs by key hash and writes one sorted temporary blob per reduce
    /// partition. Empty partitions are written too: every reduce expects all
    /// M inputs to exist.
    pub async fn run_map(
        &self,
        req: &ExecuteMapRequest,
        token: &CancellationToken,
    ) -> Result<TaskOutput, TaskError> {
        self.simulate_straggler(token).await?;

        let mapper = self
            .registry
            .mapper(&req.mapper_ref)
            .map_err(TaskError::from_user)?;

        let lines = self
            .store
            .read_line_range(&req.input_path, req.split_start, req.split_end)
            .await
            .map_err(TaskError::from_store)?;

        let num_reduces = req.num_reduces as usize;
        let mut partitions: Vec<Vec<(String, String)>> = vec![Vec::new(); num_reduces];
        let mut stats = AttemptStats::default();

        for line in &lines {
            if token.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            stats.bytes_in += line.len() as u64 + 1;

            let pairs = invoke_mapper(mapper.as_ref(), line)?;
            for (key, value) in pairs {
                let partition = codec::partition_for_key(&key, req.num_reduces) as usize;
                partitions[partition].push((key, value));
                stats.records_out += 1;
            }
        }

        let mut artefacts = Vec::with_capacity(num_reduces);
        for (reduce_index, mut partition) in partitions.into_iter().enumerate() {
            if token.is_cancelled() {
                self.delete_artefacts(&artefacts).await;
                return Err(TaskError::Cancelled);
            }

            partition.sort();

            let mut buf = Vec::new();
            for (key, value) in &partition {
                codec::encode_record(&mut buf, key, value);
            }
            stats.bytes_out += buf.len() as u64;

            let canonical =
                paths::intermediate_partition(req.job_id, req.task_index, reduce_index as u32);
            let tmp = paths::tmp(&canonical, req.attempt_id);

            if let Err(e) = self.store.write(&tmp, &buf).await {
                self.delete_artefacts(&artefacts).await;
                return Err(TaskError::from_store(e));
            }

            artefacts.push(Artefact {
                tmp_path: tmp,
                canonical_path: canonical,
            });
        }

        info!(
            "Map attempt finished: job={}, index={}, attempt={}, records_out={}",
            req.job_id, req.task_index, req.attempt_id, stats.records_out
        );

        Ok(TaskOutput { stats, artefacts })
    }

    /// Execute a reduce attempt
    ///
    /// Opens all M committed partitions for this reduce index, merge-sorts
    /// them by key, reduces each key group and writes the result as
    /// tab-separated lines to a temporary output blob.
    pub async fn run_reduce(
        &self,
        req: &ExecuteReduceRequest,
        token: &CancellationToken,
    ) -> Result<TaskOutput, TaskError> {
        self.simulate_straggler(token).await?;

        let reducer = self
            .registry
            .reducer(&req.reducer_ref)
            .map_err(TaskError::from_user)?;

        let mut stats = AttemptStats::default();
        let mut runs = Vec::with_capacity(req.num_maps as usize);

        for map_index in 0..req.num_maps {
            if token.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            let path = paths::intermediate_partition(req.job_id, map_index, req.task_index);
            let data = self.read_partition_with_retry(&path, token).await?;
            stats.bytes_in += data.len() as u64;

            runs.push(codec::decode_records(&data).map_err(TaskError::from_store)?);
        }

        let groups = codec::group_by_key(codec::KWayMerge::new(runs));

        let mut output = String::new();
        for (key, values) in &groups {
            if token.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            let pairs = invoke_reducer(reducer.as_ref(), key, values)?;
            for (out_key, out_value) in pairs {
                output.push_str(&out_key);
                output.push('\t');
                output.push_str(&out_value);
                output.push('\n');
                stats.records_out += 1;
            }
        }
        stats.bytes_out = output.len() as u64;

        let canonical = paths::output_partition(&req.output_path, req.task_index);
        let tmp = paths::tmp(&canonical, req.attempt_id);
        self.store
            .write(&tmp, output.as_bytes())
            .await
            .map_err(TaskError::from_store)?;

        info!(
            "Reduce attempt finished: job={}, index={}, attempt={}, records_out={}",
            req.job_id, req.task_index, req.attempt_id, stats.records_out
        );

        Ok(TaskOutput {
            stats,
            artefacts: vec![Artefact {
                tmp_path: tmp,
                canonical_path: canonical,
            }],
        })
    }

    /// Apply the scheduler's commit decision to an attempt's artefacts
    pub async fn apply_action(
        &self,
        action: CompletionAction,
        artefacts: &[Artefact],
    ) -> Result<(), Error> {
        match action {
            CompletionAction::Commit => {
                for artefact in artefacts {
                    self.store
                        .rename(&artefact.tmp_path, &artefact.canonical_path)
                        .await?;
                }
            }
            CompletionAction::Discard => {
                self.delete_artefacts(artefacts).await;
            }
            CompletionAction::Ack => {}
        }
        Ok(())
    }

    /// Best-effort removal of temporary artefacts
    pub async fn delete_artefacts(&self, artefacts: &[Artefact]) {
        for artefact in artefacts {
            if let Err(e) = self.store.delete(&artefact.tmp_path).await {
                warn!("Failed to delete tmp {}: {}", artefact.tmp_path, e);
            }
        }
    }

    async fn simulate_straggler(&self, token: &CancellationToken) -> Result<(), TaskError> {
        if !self.config.simulate_straggler {
            return Ok(());
        }
        debug!(
            "Straggler simulation: delaying task by {:?}",
            self.config.straggler_delay()
        );
        tokio::select! {
            _ = sleep(self.config.straggler_delay()) => Ok(()),
            _ = token.cancelled() => Err(TaskError::Cancelled),
        }
    }

    /// A committed partition can be mid-rename on the winning mapper; give
    /// it a bounded window to land before declaring the blob missing
    async fn read_partition_with_retry(
        &self,
        path: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, TaskError> {
        let mut last_error = String::new();

        for _ in 0..PARTITION_READ_RETRIES {
            if token.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            match self.store.read(path).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    last_error = e.to_string();
                    sleep(PARTITION_READ_BACKOFF).await;
                }
            }
        }

        Err(TaskError::BlobStore(format!(
            "partition {} never appeared: {}",
            path, last_error
        )))
    }
}

fn invoke_mapper(mapper: &dyn Mapper, line: &str) -> Result<Vec<(String, String)>, TaskError> {
    catch_unwind(AssertUnwindSafe(|| mapper.map(line)))
        .map_err(|_| TaskError::UserCode("mapper panicked".to_string()))?
        .map_err(TaskError::from_user)
}

fn invoke_reducer(
    reducer: &dyn Reducer,
    key: &str,
    values: &[String],
) -> Result<Vec<(String, String)>, TaskError> {
    catch_unwind(AssertUnwindSafe(|| reducer.reduce(key, values)))
        .map_err(|_| TaskError::UserCode("reducer panicked".to_string()))?
        .map_err(TaskError::from_user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::LocalBlobStore;
    use crate::scheduler::job::JobId;
    use uuid::Uuid;

    fn executor(capacity: usize) -> (tempfile::TempDir, Arc<TaskExecutor>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let config = WorkerConfig {
            capacity,
            ..WorkerConfig::default()
        };
        (dir, Arc::new(TaskExecutor::new(store, config)))
    }

    fn map_request(job_id: JobId, input: &str, split: (u64, u64), r: u32) -> ExecuteMapRequest {
        ExecuteMapRequest {
            job_id,
            task_index: 0,
            attempt_id: Uuid::new_v4(),
            input_path: input.to_string(),
            split_start: split.0,
            split_end: split.1,
            mapper_ref: "wordcount".to_string(),
            num_reduces: r,
        }
    }

    #[tokio::test]
    async fn test_slot_accounting() {
        let (_dir, executor) = executor(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let token = executor.try_begin(first).await.unwrap();
        assert!(!token.is_cancelled());

        // Capacity 1: the second attempt is refused
        let err = executor.try_begin(second).await.unwrap_err();
        assert_eq!(err.category(), "worker_unavailable");

        // Re-claiming the running attempt is fine
        assert!(executor.try_begin(first).await.is_ok());

        executor.finish(first).await;
        assert!(executor.try_begin(second).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (_dir, executor) = executor(1);
        let attempt = Uuid::new_v4();

        // Cancelling something never started is a no-op
        executor.cancel(attempt).await;

        let token = executor.try_begin(attempt).await.unwrap();
        executor.cancel(attempt).await;
        executor.cancel(attempt).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_map_partitions_and_sorts() {
        let (_dir, executor) = executor(1);
        let job_id = JobId::new_v4();

        executor
            .store
            .write("input/words.txt", b"hello world\nhello again\n")
            .await
            .unwrap();

        let req = map_request(job_id, "input/words.txt", (0, 2), 2);
        let token = CancellationToken::new();
        let output = executor.run_map(&req, &token).await.unwrap();

        // One artefact per reduce partition, all under tmp paths
        assert_eq!(output.artefacts.len(), 2);
        for artefact in &output.artefacts {
            assert!(paths::is_tmp(&artefact.tmp_path));
            assert!(executor.store.exists(&artefact.tmp_path).await.unwrap());
            assert!(!executor.store.exists(&artefact.canonical_path).await.unwrap());
        }

        assert_eq!(output.stats.records_out, 4);

        // Every record landed in the partition its key hashes to, sorted
        let mut seen = 0;
        for (r, artefact) in output.artefacts.iter().enumerate() {
            let data = executor.store.read(&artefact.tmp_path).await.unwrap();
            let records = codec::decode_records(&data).unwrap();
            let keys: Vec<&str> = records.iter().map(|(k, _)| k.as_str()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
            for (key, _) in &records {
                assert_eq!(codec::partition_for_key(key, 2), r as u32);
                seen += 1;
            }
        }
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn test_map_empty_split_writes_empty_partitions() {
        let (_dir, executor) = executor(1);
        executor.store.write("input/empty.txt", b"").await.unwrap();

        let req = map_request(JobId::new_v4(), "input/empty.txt", (0, 0), 3);
        let output = executor
            .run_map(&req, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.artefacts.len(), 3);
        assert_eq!(output.stats.records_out, 0);
        for artefact in &output.artefacts {
            let data = executor.store.read(&artefact.tmp_path).await.unwrap();
            assert!(data.is_empty());
        }
    }

    #[tokio::test]
    async fn test_map_unknown_mapper_is_user_code_error() {
        let (_dir, executor) = executor(1);
        executor.store.write("input/x.txt", b"line\n").await.unwrap();

        let mut req = map_request(JobId::new_v4(), "input/x.txt", (0, 1), 1);
        req.mapper_ref = "missing".to_string();

        let err = executor
            .run_map(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UserCode(_)));
    }

    #[tokio::test]
    async fn test_map_then_reduce_end_to_end() {
        let (_dir, executor) = executor(2);
        let job_id = JobId::new_v4();

        executor
            .store
            .write("input/words.txt", b"hello world\nhello mapreduce\n")
            .await
            .unwrap();

        // Single map over the whole input, committed by renaming
        let map_req = map_request(job_id, "input/words.txt", (0, 2), 1);
        let token = CancellationToken::new();
        let map_out = executor.run_map(&map_req, &token).await.unwrap();
        executor
            .apply_action(CompletionAction::Commit, &map_out.artefacts)
            .await
            .unwrap();

        let reduce_req = ExecuteReduceRequest {
            job_id,
            task_index: 0,
            attempt_id: Uuid::new_v4(),
            num_maps: 1,
            reducer_ref: "wordcount".to_string(),
            output_path: "out/wc".to_string(),
        };
        let reduce_out = executor.run_reduce(&reduce_req, &token).await.unwrap();
        executor
            .apply_action(CompletionAction::Commit, &reduce_out.artefacts)
            .await
            .unwrap();

        let text = String::from_utf8(
            executor.store.read("out/wc/reduce-0.txt").await.unwrap(),
        )
        .unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["hello\t2", "mapreduce\t1", "world\t1"]);
    }

    #[tokio::test]
    async fn test_discard_removes_tmp_output() {
        let (_dir, executor) = executor(1);
        executor.store.write("input/x.txt", b"a b\n").await.unwrap();

        let req = map_request(JobId::new_v4(), "input/x.txt", (0, 1), 1);
        let output = executor
            .run_map(&req, &CancellationToken::new())
            .await
            .unwrap();

        executor
            .apply_action(CompletionAction::Discard, &output.artefacts)
            .await
            .unwrap();

        for artefact in &output.artefacts {
            assert!(!executor.store.exists(&artefact.tmp_path).await.unwrap());
            assert!(!executor.store.exists(&artefact.canonical_path).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_map() {
        let (_dir, executor) = executor(1);
        executor.store.write("input/x.txt", b"a\nb\n").await.unwrap();

        let req = map_request(JobId::new_v4(), "input/x.txt", (0, 2), 1);
        let token = CancellationToken::new();
        token.cancel();

        let err = executor.run_map(&req, &token).await.unwrap_err();
        assert!(matches!(err, TaskError::Cancelled));
    }

    #[tokio::test]
    async fn test_reduce_fails_when_partition_never_appears() {
        let (_dir, executor) = executor(1);

        let req = ExecuteReduceRequest {
            job_id: JobId::new_v4(),
            task_index: 0,
            attempt_id: Uuid::new_v4(),
            num_maps: 1,
            reducer_ref: "wordcount".to_string(),
            output_path: "out/never".to_string(),
        };

        // Cancel quickly so the retry window does not stall the test
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = executor.run_reduce(&req, &token).await.unwrap_err();
        assert!(matches!(err, TaskError::Cancelled | TaskError::BlobStore(_)));
    }
}
