//! Job storage port and the in-memory implementation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use labstore_core::JobId;

use super::types::{Job, JobState};

/// Match predicate over job records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub id: Option<JobId>,
    pub state: Option<JobState>,
    /// Strictly older than this instant.
    pub modified_before: Option<DateTime<Utc>>,
    pub min_attempt: Option<u32>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: JobId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn in_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn modified_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.modified_before = Some(cutoff);
        self
    }

    pub fn min_attempt(mut self, attempt: u32) -> Self {
        self.min_attempt = Some(attempt);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.id.is_none_or(|id| job.id == Some(id))
            && self.state.is_none_or(|s| job.state == s)
            && self.modified_before.is_none_or(|cutoff| job.modified < cutoff)
            && self.min_attempt.is_none_or(|a| job.attempt >= a)
    }
}

/// Fields to set on a matched record. `fields` is merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub modified: Option<DateTime<Utc>>,
    pub request: Option<JsonValue>,
    pub fields: Map<String, JsonValue>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn modified(mut self, at: DateTime<Utc>) -> Self {
        self.modified = Some(at);
        self
    }

    pub fn request(mut self, request: JsonValue) -> Self {
        self.request = Some(request);
        self
    }

    pub fn fields(mut self, fields: Map<String, JsonValue>) -> Self {
        self.fields = fields;
        self
    }

    pub fn apply(&self, job: &mut Job) {
        if let Some(state) = self.state {
            job.state = state;
        }
        if let Some(modified) = self.modified {
            job.modified = modified;
        }
        if let Some(request) = &self.request {
            job.request = Some(request.clone());
        }
        for (k, v) in &self.fields {
            job.fields.insert(k.clone(), v.clone());
        }
    }
}

/// Ordering hint for reads and claims.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobSort {
    /// Oldest `modified` first (FIFO).
    ModifiedAsc,
    /// Most recently touched first.
    ModifiedDesc,
}

impl JobSort {
    fn compare(&self, a: &Job, b: &Job) -> Ordering {
        let by_modified = a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id));
        match self {
            JobSort::ModifiedAsc => by_modified,
            JobSort::ModifiedDesc => by_modified.reverse(),
        }
    }
}

/// Grouping key for aggregate counts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GroupKey {
    State,
    /// Groups by the whole tag list, not by individual tags.
    Tags,
}

/// A group produced by [`JobStore::aggregate_group_count`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupValue {
    State(JobState),
    Tags(Vec<String>),
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Atomic document-store capability the queue is built on.
///
/// Every method must be atomic on its own: `find_and_update` and
/// `update_one_conditional` evaluate the filter and apply the update as one
/// step, so two callers can never both win the same record.
pub trait JobStore: Send + Sync {
    /// Persist a new record, assigning an id if it has none.
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, JobStoreError>;

    fn find(
        &self,
        filter: &JobFilter,
        sort: JobSort,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Update the first record matching `filter` (in `sort` order) and return
    /// it as it is after the update. `None` when nothing matched.
    fn find_and_update(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
        sort: Option<JobSort>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Update at most one record matching `filter`; returns how many changed.
    fn update_one_conditional(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
    ) -> Result<u64, JobStoreError>;

    fn aggregate_group_count(&self, key: GroupKey) -> Result<Vec<(GroupValue, u64)>, JobStoreError>;

    fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).insert(job)
    }

    fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, JobStoreError> {
        (**self).find_one(filter)
    }

    fn find(
        &self,
        filter: &JobFilter,
        sort: JobSort,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).find(filter, sort, limit)
    }

    fn find_and_update(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
        sort: Option<JobSort>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).find_and_update(filter, update, sort)
    }

    fn update_one_conditional(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
    ) -> Result<u64, JobStoreError> {
        (**self).update_one_conditional(filter, update)
    }

    fn aggregate_group_count(&self, key: GroupKey) -> Result<Vec<(GroupValue, u64)>, JobStoreError> {
        (**self).aggregate_group_count(key)
    }

    fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        (**self).count(filter)
    }
}

/// In-memory job store for tests/dev.
///
/// Every operation runs under a single lock, which makes each one atomic.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, mut job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        let id = *job.id.get_or_insert_with(JobId::new);
        if jobs.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }
        jobs.insert(id, job);
        Ok(id)
    }

    fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.read()?;
        if let Some(id) = filter.id {
            return Ok(jobs.get(&id).filter(|j| filter.matches(j)).cloned());
        }
        Ok(jobs.values().find(|j| filter.matches(j)).cloned())
    }

    fn find(
        &self,
        filter: &JobFilter,
        sort: JobSort,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        result.sort_by(|a, b| sort.compare(a, b));
        result.truncate(limit);
        Ok(result)
    }

    fn find_and_update(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
        sort: Option<JobSort>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;

        let candidates = jobs.values().filter(|j| filter.matches(j));
        let target = match sort {
            Some(sort) => candidates.min_by(|a, b| sort.compare(a, b)),
            None => candidates.min_by_key(|j| j.id),
        }
        .and_then(|j| j.id);

        let Some(id) = target else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        update.apply(job);
        Ok(Some(job.clone()))
    }

    fn update_one_conditional(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
    ) -> Result<u64, JobStoreError> {
        let mut jobs = self.write()?;
        let target = match filter.id {
            Some(id) => jobs.get_mut(&id).filter(|j| filter.matches(j)),
            None => jobs.values_mut().find(|j| filter.matches(j)),
        };
        match target {
            Some(job) => {
                update.apply(job);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn aggregate_group_count(&self, key: GroupKey) -> Result<Vec<(GroupValue, u64)>, JobStoreError> {
        let jobs = self.read()?;
        let mut counts: HashMap<GroupValue, u64> = HashMap::new();
        for job in jobs.values() {
            let group = match key {
                GroupKey::State => GroupValue::State(job.state),
                GroupKey::Tags => GroupValue::Tags(job.tags.clone()),
            };
            *counts.entry(group).or_insert(0) += 1;
        }

        let mut result: Vec<(GroupValue, u64)> = counts.into_iter().collect();
        result.sort();
        Ok(result)
    }

    fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        let jobs = self.read()?;
        Ok(jobs.values().filter(|j| filter.matches(j)).count() as u64)
    }
}
