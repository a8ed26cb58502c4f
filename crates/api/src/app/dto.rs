use serde::{Deserialize, Serialize};

use labstore_core::JobId;
use labstore_infra::config::QueueConfig;
use labstore_infra::jobs::{Job, JobState, ReaperStats, RetryOutcome};

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub id: JobId,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
}

/// Result of `PUT /jobs/:id`; `retry` is set when the update failed the job.
#[derive(Debug, Serialize)]
pub struct JobUpdatedResponse {
    pub retry: Option<RetryOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ReapResponse {
    pub orphaned: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub backend: &'static str,
    pub queue: QueueConfig,
    /// Records held by the in-memory store; absent for Postgres.
    pub stored_jobs: Option<usize>,
    pub reaper: Option<ReaperStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_is_clamped() {
        let q = |limit| ListJobsQuery { state: None, limit };
        assert_eq!(q(None).effective_limit(), DEFAULT_LIST_LIMIT);
        assert_eq!(q(Some(0)).effective_limit(), 1);
        assert_eq!(q(Some(50_000)).effective_limit(), MAX_LIST_LIMIT);
    }
}
