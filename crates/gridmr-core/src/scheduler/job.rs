//! Job types and definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::scheduler::task::TaskKind;

/// Unique job identifier
pub type JobId = Uuid;

/// Coarse job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Map tasks are being executed
    MapPhase,

    /// All maps committed; reduce tasks are being executed
    ReducePhase,

    /// Every reduce partition committed
    Completed,

    /// A task exhausted its attempts or an invariant broke
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::MapPhase => write!(f, "map"),
            JobPhase::ReducePhase => write!(f, "reduce"),
            JobPhase::Completed => write!(f, "completed"),
            JobPhase::Failed => write!(f, "failed"),
        }
    }
}

impl JobPhase {
    /// Check if the phase is terminal (won't change)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    /// Task kind executed during this phase, if any
    pub fn task_kind(&self) -> Option<TaskKind> {
        match self {
            JobPhase::MapPhase => Some(TaskKind::Map),
            JobPhase::ReducePhase => Some(TaskKind::Reduce),
            JobPhase::Completed | JobPhase::Failed => None,
        }
    }
}

/// Everything a submission names about a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Store path of the input blob
    pub input_path: String,

    /// Store directory for final outputs
    pub output_path: String,

    /// Mapper code reference
    pub mapper_ref: String,

    /// Reducer code reference
    pub reducer_ref: String,

    /// Number of map tasks (M)
    pub num_maps: u32,

    /// Number of reduce partitions (R)
    pub num_reduces: u32,
}

impl JobSpec {
    /// Validate the submission shape; input existence is checked separately
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.num_maps < 1 {
            return Err(crate::Error::bad_request("num_maps must be >= 1"));
        }
        if self.num_reduces < 1 {
            return Err(crate::Error::bad_request("num_reduces must be >= 1"));
        }
        if self.mapper_ref.trim().is_empty() {
            return Err(crate::Error::bad_request("mapper_ref must be non-empty"));
        }
        if self.reducer_ref.trim().is_empty() {
            return Err(crate::Error::bad_request("reducer_ref must be non-empty"));
        }
        Ok(())
    }

    /// Line range `[i*L/M, (i+1)*L/M)` of map split `i` over `line_count` lines
    pub fn split_range(&self, index: u32, line_count: u64) -> (u64, u64) {
        let m = self.num_maps as u64;
        let i = index as u64;
        (i * line_count / m, (i + 1) * line_count / m)
    }
}

/// Commit-time measurements the straggler monitor feeds on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionStats {
    /// Wall-clock durations of committed map attempts
    pub map_durations_ms: Vec<u64>,

    /// Wall-clock durations of committed reduce attempts
    pub reduce_durations_ms: Vec<u64>,

    /// Task labels in commit order, monotone for the job's lifetime
    pub completion_sequence: Vec<String>,
}

impl CompletionStats {
    /// Durations committed so far for one task kind
    pub fn durations_for(&self, kind: TaskKind) -> &[u64] {
        match kind {
            TaskKind::Map => &self.map_durations_ms,
            TaskKind::Reduce => &self.reduce_durations_ms,
        }
    }

    fn record(&mut self, kind: TaskKind, duration_ms: u64, task_label: String) {
        match kind {
            TaskKind::Map => self.map_durations_ms.push(duration_ms),
            TaskKind::Reduce => self.reduce_durations_ms.push(duration_ms),
        }
        self.completion_sequence.push(task_label);
    }
}

/// Job definition and mutable lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Submission parameters
    pub spec: JobSpec,

    /// Current phase
    pub phase: JobPhase,

    /// Submission timestamp (unix millis)
    pub submitted_at: i64,

    /// First failure that drove the job towards Failed
    pub error_message: Option<String>,

    /// Attempts that finished with Error, Cancelled or TimedOut
    pub failed_attempts: u32,

    /// Commit measurements
    pub completion_stats: CompletionStats,
}

impl Job {
    /// Create a new job in MapPhase
    pub fn new(spec: JobSpec, now_ms: i64) -> Self {
        Self {
            id: JobId::new_v4(),
            spec,
            phase: JobPhase::MapPhase,
            submitted_at: now_ms,
            error_message: None,
            failed_attempts: 0,
            completion_stats: CompletionStats::default(),
        }
    }

    /// Check whether the job still schedules work
    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Record one committed attempt of the current phase
    pub fn record_commit(&mut self, kind: TaskKind, duration_ms: u64, task_label: String) {
        self.completion_stats.record(kind, duration_ms, task_label);
    }

    /// Remember the first error seen, without failing the job yet
    pub fn note_error(&mut self, message: impl Into<String>) {
        if self.error_message.is_none() {
            self.error_message = Some(message.into());
        }
    }

    /// Advance MapPhase -> ReducePhase
    pub fn mark_reduce_phase(&mut self) {
        self.phase = JobPhase::ReducePhase;
    }

    /// Advance to Completed
    pub fn mark_completed(&mut self) {
        self.phase = JobPhase::Completed;
    }

    /// Fail the job, keeping the first error message
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        if self.error_message.is_none() {
            self.error_message = Some(message.into());
        }
        self.phase = JobPhase::Failed;
    }
}

/// Median of a duration sample, averaging the middle pair for even sizes
pub fn median_ms(samples: &[u64]) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(m: u32, r: u32) -> JobSpec {
        JobSpec {
            input_path: "input/words.txt".to_string(),
            output_path: "out/wc".to_string(),
            mapper_ref: "wordcount".to_string(),
            reducer_ref: "wordcount".to_string(),
            num_maps: m,
            num_reduces: r,
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(spec(2, 2).validate().is_ok());

        let mut bad = spec(0, 2);
        assert!(bad.validate().is_err());
        bad = spec(2, 0);
        assert!(bad.validate().is_err());
        bad = spec(2, 2);
        bad.mapper_ref = "  ".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_split_ranges_cover_input() {
        let spec = spec(3, 1);
        let ranges: Vec<(u64, u64)> = (0..3).map(|i| spec.split_range(i, 10)).collect();

        assert_eq!(ranges, vec![(0, 3), (3, 6), (6, 10)]);

        // Splits tile the input exactly
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges[2].1, 10);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn test_split_ranges_empty_input() {
        let spec = spec(2, 2);
        assert_eq!(spec.split_range(0, 0), (0, 0));
        assert_eq!(spec.split_range(1, 0), (0, 0));
    }

    #[test]
    fn test_phase_lifecycle() {
        let mut job = Job::new(spec(2, 2), 0);
        assert_eq!(job.phase, JobPhase::MapPhase);
        assert!(job.is_active());

        job.mark_reduce_phase();
        assert_eq!(job.phase, JobPhase::ReducePhase);
        assert_eq!(job.phase.task_kind(), Some(TaskKind::Reduce));

        job.mark_completed();
        assert!(job.phase.is_terminal());
        assert!(!job.is_active());
    }

    #[test]
    fn test_first_error_wins() {
        let mut job = Job::new(spec(1, 1), 0);
        job.mark_failed("mapper panicked");
        job.mark_failed("worker died");

        assert_eq!(job.phase, JobPhase::Failed);
        assert_eq!(job.error_message.as_deref(), Some("mapper panicked"));
    }

    #[test]
    fn test_commit_recording() {
        let mut job = Job::new(spec(2, 1), 0);
        job.record_commit(TaskKind::Map, 120, "map-0".to_string());
        job.record_commit(TaskKind::Map, 80, "map-1".to_string());
        job.record_commit(TaskKind::Reduce, 300, "reduce-0".to_string());

        assert_eq!(job.completion_stats.durations_for(TaskKind::Map), &[120, 80]);
        assert_eq!(job.completion_stats.durations_for(TaskKind::Reduce), &[300]);
        assert_eq!(
            job.completion_stats.completion_sequence,
            vec!["map-0", "map-1", "reduce-0"]
        );
    }

    #[test]
    fn test_median() {
        assert_eq!(median_ms(&[]), None);
        assert_eq!(median_ms(&[10]), Some(10));
        assert_eq!(median_ms(&[30, 10, 20]), Some(20));
        assert_eq!(median_ms(&[10, 20, 30, 40]), Some(25));
    }
}
