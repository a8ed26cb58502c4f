//! FIFO job queue over a [`JobStore`].
//!
//! The queue holds no locks of its own. Every state change goes through one
//! of the store's atomic primitives:
//!
//! - claim: `find_and_update` on the oldest pending record
//! - mutate: `update_one_conditional` guarded by the caller's snapshot state
//! - orphan scan: `find_and_update` on stale running records

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use labstore_core::JobId;

use super::requests::JobTypeRegistry;
use super::store::{GroupKey, GroupValue, JobFilter, JobSort, JobStore, JobStoreError, JobUpdate};
use super::types::{Job, JobMutation, JobState, NewJob, RetryOutcome};
use crate::config::QueueConfig;

/// Queue operation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("cannot mutate job {id}: it is {state}")]
    InvalidState { id: JobId, state: JobState },

    #[error("job {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("job {id} was modified concurrently (expected state {expected})")]
    ConcurrentModification { id: JobId, expected: JobState },

    #[error("job {id} was claimed but its request could not be stored: {reason}")]
    RequestPersist { id: JobId, reason: String },

    #[error("job has no id; it was never inserted")]
    MissingId,

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Number of records sharing one exact tag list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tags: Vec<String>,
    pub count: u64,
}

/// Queue overview returned by [`Queue::get_statistics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatistics {
    /// Every state is present, zero when empty.
    #[serde(rename = "by-state")]
    pub by_state: BTreeMap<JobState, u64>,
    #[serde(rename = "by-tag")]
    pub by_tag: Vec<TagCount>,
    /// Failed records that will not be retried automatically.
    pub permafailed: u64,
}

/// The job queue.
#[derive(Debug)]
pub struct Queue<S: JobStore> {
    store: S,
    registry: JobTypeRegistry,
    config: QueueConfig,
}

impl<S: JobStore> Queue<S> {
    pub fn new(store: S, registry: JobTypeRegistry, config: QueueConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Insert a new pending job at attempt 0.
    pub fn enqueue(&self, new_job: NewJob) -> Result<JobId, QueueError> {
        new_job
            .validate()
            .map_err(|e| QueueError::Validation(e.to_string()))?;

        let job = new_job.into_job(Utc::now());
        let name = job.name.clone();
        let id = self.store.insert(job)?;
        info!(job_id = %id, job_type = %name, "enqueued job");
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.store
            .find_one(&JobFilter::by_id(id))?
            .ok_or(QueueError::NotFound(id))
    }

    /// Records oldest-`modified` first, optionally restricted to one state.
    pub fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, QueueError> {
        let filter = JobFilter {
            state,
            ..JobFilter::default()
        };
        Ok(self.store.find(&filter, JobSort::ModifiedAsc, limit)?)
    }

    /// Apply `mutation` to the record `job` was read from.
    ///
    /// The write only lands if the record is still in `job.state`; otherwise
    /// [`QueueError::ConcurrentModification`]. `modified` is always stamped
    /// server-side. A mutation into `failed` runs [`Queue::retry`] and returns
    /// its outcome.
    pub fn mutate(
        &self,
        job: &Job,
        mutation: JobMutation,
    ) -> Result<Option<RetryOutcome>, QueueError> {
        let id = job.id.ok_or(QueueError::MissingId)?;

        if !job.state.allows_mutation() {
            return Err(QueueError::InvalidState {
                id,
                state: job.state,
            });
        }
        if let Some(to) = mutation.state {
            if !job.can_transition_to(to) {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: job.state,
                    to,
                });
            }
        }
        let mutation = mutation
            .sanitize()
            .map_err(|e| QueueError::Validation(e.to_string()))?;

        let update = JobUpdate {
            state: mutation.state,
            modified: Some(Utc::now()),
            request: None,
            fields: mutation.fields,
        };
        let guard = JobFilter::by_id(id).with_state(job.state);

        if self.store.update_one_conditional(&guard, &update)? != 1 {
            warn!(job_id = %id, expected = %job.state, "job mutation lost a race");
            return Err(QueueError::ConcurrentModification {
                id,
                expected: job.state,
            });
        }

        match update.state {
            Some(to) if to != job.state => {
                debug!(job_id = %id, from = %job.state, to = %to, "job state changed");
            }
            _ => debug!(job_id = %id, state = %job.state, "job heartbeat"),
        }

        if update.state == Some(JobState::Failed) {
            let mut failed = job.clone();
            update.apply(&mut failed);
            return self.retry(&failed, false).map(Some);
        }
        Ok(None)
    }

    /// Respawn a failed job as a new pending record, or give up once the
    /// attempt ceiling is reached. `force` ignores the ceiling.
    ///
    /// The original record is never changed.
    pub fn retry(&self, job: &Job, force: bool) -> Result<RetryOutcome, QueueError> {
        let previous = job.id.ok_or(QueueError::MissingId)?;

        if job.attempt >= self.config.max_attempts && !force {
            warn!(
                job_id = %previous,
                attempts = job.attempt,
                "permanently failed job"
            );
            return Ok(RetryOutcome::PermanentlyFailed {
                id: previous,
                attempts: job.attempt,
            });
        }

        let next = job.respawn(Utc::now());
        let attempt = next.attempt;
        let id = self.store.insert(next)?;
        info!(
            job_id = %id,
            previous = %previous,
            attempt,
            forced = force,
            "respawned job"
        );
        Ok(RetryOutcome::Respawned {
            previous,
            id,
            attempt,
        })
    }

    /// Operator retry of a stored record; the record must be `failed`.
    pub fn retry_job(&self, id: JobId, force: bool) -> Result<RetryOutcome, QueueError> {
        let job = self.get(id)?;
        if job.state != JobState::Failed {
            return Err(QueueError::InvalidState {
                id,
                state: job.state,
            });
        }
        self.retry(&job, force)
    }

    /// Claim the oldest pending job and attach its execution request.
    ///
    /// `Ok(None)` means there is no work. If the request cannot be generated
    /// or stored the job stays `running` without a request; the orphan scan
    /// reclaims it once its heartbeat goes stale.
    pub fn start_job(&self) -> Result<Option<Job>, QueueError> {
        let claim = JobUpdate::new()
            .state(JobState::Running)
            .modified(Utc::now());
        let Some(job) = self.store.find_and_update(
            &JobFilter::in_state(JobState::Pending),
            &claim,
            Some(JobSort::ModifiedAsc),
        )?
        else {
            return Ok(None);
        };
        let id = job.id.ok_or(QueueError::MissingId)?;

        let request = self.registry.generate(&job).map_err(|e| {
            error!(job_id = %id, job_type = %job.name, error = %e, "failed to generate job request");
            QueueError::RequestPersist {
                id,
                reason: e.to_string(),
            }
        })?;

        let stored = self.store.find_and_update(
            &JobFilter::by_id(id),
            &JobUpdate::new().request(request),
            None,
        )?;
        match stored {
            Some(job) => {
                info!(job_id = %id, job_type = %job.name, attempt = job.attempt, "started job");
                Ok(Some(job))
            }
            None => {
                error!(job_id = %id, "claimed job vanished before its request was stored");
                Err(QueueError::RequestPersist {
                    id,
                    reason: "job record no longer exists".to_string(),
                })
            }
        }
    }

    /// Fail running jobs whose heartbeat is older than the orphan timeout and
    /// retry each one. Returns how many were reclaimed.
    ///
    /// One pass reclaims at most `max_orphans_per_scan` jobs.
    pub fn scan_for_orphans(&self) -> Result<u64, QueueError> {
        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(self.config.orphan_cutoff_offset()) else {
            warn!(
                orphan_timeout_secs = self.config.orphan_timeout.as_secs(),
                "orphan timeout reaches before the earliest representable time; nothing can be stale"
            );
            return Ok(0);
        };
        let stale = JobFilter::in_state(JobState::Running).modified_before(cutoff);
        // The failed record keeps its last heartbeat as `modified`.
        let fail = JobUpdate::new().state(JobState::Failed);
        let cap = u64::from(self.config.max_orphans_per_scan);

        let mut orphaned = 0u64;
        while orphaned < cap {
            let Some(job) =
                self.store
                    .find_and_update(&stale, &fail, Some(JobSort::ModifiedAsc))?
            else {
                break;
            };
            orphaned += 1;
            info!(job_id = ?job.id, attempt = job.attempt, "reclaimed orphaned job");
            if let Err(e) = self.retry(&job, false) {
                error!(
                    job_id = ?job.id,
                    attempt = job.attempt,
                    orphaned,
                    error = %e,
                    "orphaned job failed without a successor; retry it manually"
                );
                return Err(e);
            }
        }

        if orphaned >= cap && self.store.count(&stale)? > 0 {
            warn!(
                orphaned,
                cap, "orphan scan stopped at its cap; remaining orphans wait for the next scan"
            );
        } else if orphaned > 0 {
            info!(orphaned, "orphan scan finished");
        }
        Ok(orphaned)
    }

    /// Counts by state, by exact tag list, and permanently failed records.
    pub fn get_statistics(&self) -> Result<QueueStatistics, QueueError> {
        let mut by_state: BTreeMap<JobState, u64> =
            JobState::ALL.iter().map(|s| (*s, 0)).collect();
        for (group, count) in self.store.aggregate_group_count(GroupKey::State)? {
            if let GroupValue::State(state) = group {
                by_state.insert(state, count);
            }
        }

        let by_tag = self
            .store
            .aggregate_group_count(GroupKey::Tags)?
            .into_iter()
            .filter_map(|(group, count)| match group {
                GroupValue::Tags(tags) => Some(TagCount { tags, count }),
                GroupValue::State(_) => None,
            })
            .collect();

        let permafailed = self.store.count(
            &JobFilter::in_state(JobState::Failed).min_attempt(self.config.max_attempts),
        )?;

        Ok(QueueStatistics {
            by_state,
            by_tag,
            permafailed,
        })
    }
}
