//! Canonical path scheme
//!
//! Readers depend on these layouts, so they live in one place:
//!
//! - input:        `input/<user-chosen>`
//! - intermediate: `intermediate/{job_id}/map-{m}-reduce-{r}.pb`
//! - output:       `{output_path}/reduce-{r}.txt`
//! - temporary:    any of the above with `.tmp.{attempt_id}` appended

use crate::scheduler::job::JobId;
use crate::scheduler::task::AttemptId;

/// Directory holding a job's intermediate partitions
pub fn intermediate_dir(job_id: JobId) -> String {
    format!("intermediate/{}", job_id)
}

/// Canonical intermediate partition written by map `m` for reduce `r`
pub fn intermediate_partition(job_id: JobId, map_index: u32, reduce_index: u32) -> String {
    format!(
        "intermediate/{}/map-{}-reduce-{}.pb",
        job_id, map_index, reduce_index
    )
}

/// Canonical output partition of reduce task `r`
pub fn output_partition(output_path: &str, reduce_index: u32) -> String {
    format!(
        "{}/reduce-{}.txt",
        output_path.trim_end_matches('/'),
        reduce_index
    )
}

/// Temporary path for one attempt's rendition of a canonical blob
pub fn tmp(canonical: &str, attempt_id: AttemptId) -> String {
    format!("{}.tmp.{}", canonical, attempt_id)
}

/// Whether a path names a temporary artefact
pub fn is_tmp(path: &str) -> bool {
    path.contains(".tmp.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_intermediate_layout() {
        let job_id = Uuid::nil();
        assert_eq!(
            intermediate_partition(job_id, 3, 7),
            format!("intermediate/{}/map-3-reduce-7.pb", job_id)
        );
        assert!(intermediate_partition(job_id, 3, 7).starts_with(&intermediate_dir(job_id)));
    }

    #[test]
    fn test_output_layout() {
        assert_eq!(output_partition("out/wc", 2), "out/wc/reduce-2.txt");
        assert_eq!(output_partition("out/wc/", 2), "out/wc/reduce-2.txt");
    }

    #[test]
    fn test_tmp_marker() {
        let attempt = Uuid::nil();
        let path = tmp("out/wc/reduce-2.txt", attempt);
        assert_eq!(path, format!("out/wc/reduce-2.txt.tmp.{}", attempt));
        assert!(is_tmp(&path));
        assert!(!is_tmp("out/wc/reduce-2.txt"));
    }
}
