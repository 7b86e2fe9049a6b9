//! Whether a live subscription should exist for a job.

use crate::job::Job;

/// `true` while the job is cached and not yet terminal.
pub fn is_active(job: Option<&Job>) -> bool {
    job.is_some_and(|j| j.status.is_in_progress())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPatch, JobStatus, ALL_STATUSES};

    #[test]
    fn absent_job_is_inactive() {
        assert!(!is_active(None));
    }

    #[test]
    fn only_in_progress_statuses_are_active() {
        for status in ALL_STATUSES {
            let job = Job::from_patch("abc", JobPatch::status(status));
            let expected = !matches!(status, JobStatus::Completed | JobStatus::Failed);
            assert_eq!(is_active(Some(&job)), expected, "status {status}");
        }
    }
}
