//! Job record, states, and the structured mutation type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use labstore_core::{ContainerRef, DomainError, JobId};

use super::transitions::valid_transition;

/// Job execution state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, eligible for claim
    Pending,
    /// Claimed by an engine; `modified` is its heartbeat
    Running,
    /// Errored or orphaned (terminal for this record)
    Failed,
    /// Finished successfully (terminal)
    Complete,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Failed,
        JobState::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Failed => "failed",
            JobState::Complete => "complete",
        }
    }

    /// Only pending and running records accept mutations.
    pub fn allows_mutation(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Complete)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "failed" => Ok(JobState::Failed),
            "complete" => Ok(JobState::Complete),
            other => Err(DomainError::validation(format!("unknown job state '{other}'"))),
        }
    }
}

/// A named input file: a file on some container of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(flatten)]
    pub container: ContainerRef,
    /// File name on the container.
    pub name: String,
}

impl JobInput {
    pub fn new(container: ContainerRef, name: impl Into<String>) -> Self {
        Self {
            container,
            name: name.into(),
        }
    }

    /// Resource path of the file, e.g. `/acquisitions/{id}/files/t1.nii.gz`.
    pub fn file_path(&self) -> String {
        format!("{}/files/{}", self.container.path(), self.name)
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Absent until the record is first inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    /// Job type; selects the request generator at claim time.
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, JobInput>,
    #[serde(default)]
    pub destination: Option<ContainerRef>,
    /// Opaque per-type configuration.
    #[serde(default)]
    pub config: JsonValue,
    pub state: JobState,
    pub attempt: u32,
    #[serde(default)]
    pub previous_job_id: Option<JobId>,
    pub created: DateTime<Utc>,
    /// Last state-relevant write. FIFO key and heartbeat.
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Execution description, materialized when the job is claimed.
    #[serde(default)]
    pub request: Option<JsonValue>,
    /// Auxiliary fields written through mutations.
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
}

impl Job {
    pub fn can_transition_to(&self, to: JobState) -> bool {
        valid_transition(self.state, to)
    }

    /// Successor record for a retry.
    ///
    /// Fresh identity (assigned on insert), back to pending, one more attempt,
    /// linked to `self`. The request is dropped; it is regenerated on claim.
    pub fn respawn(&self, now: DateTime<Utc>) -> Job {
        let mut next = self.clone();
        next.id = None;
        next.state = JobState::Pending;
        next.attempt = self.attempt + 1;
        next.previous_job_id = self.id;
        next.request = None;
        next.created = now;
        next.modified = now;
        next
    }
}

/// A job submission, before it becomes a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, JobInput>,
    #[serde(default)]
    pub destination: Option<ContainerRef>,
    #[serde(default)]
    pub config: JsonValue,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewJob {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, input: JobInput) -> Self {
        self.inputs.insert(key.into(), input);
        self
    }

    pub fn with_destination(mut self, destination: ContainerRef) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("job name must not be empty"));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(DomainError::validation("job tags must not be empty strings"));
        }
        Ok(())
    }

    /// Pending, first-attempt record stamped at `now`.
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: None,
            name: self.name,
            inputs: self.inputs,
            destination: self.destination,
            config: self.config,
            state: JobState::Pending,
            attempt: 0,
            previous_job_id: None,
            created: now,
            modified: now,
            tags: self.tags,
            request: None,
            fields: Map::new(),
        }
    }
}

/// Field names a mutation may never write.
///
/// `modified` is absent on purpose: callers may send it, the queue overwrites it.
const PROTECTED_FIELDS: &[&str] = &[
    "id",
    "_id",
    "name",
    "attempt",
    "previous_job_id",
    "created",
    "request",
    "inputs",
    "destination",
    "config",
    "tags",
];

/// Partial update of a job: an optional new state plus auxiliary fields.
///
/// On the wire this is a flat object, e.g. `{"state": "complete", "progress": 100}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMutation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl JobMutation {
    /// A mutation that only refreshes the heartbeat.
    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn to_state(state: JobState) -> Self {
        Self {
            state: Some(state),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Reject writes to fields the queue owns; drop a caller-supplied `modified`.
    pub fn sanitize(mut self) -> Result<Self, DomainError> {
        if let Some(key) = self
            .fields
            .keys()
            .find(|k| PROTECTED_FIELDS.contains(&k.as_str()))
        {
            return Err(DomainError::validation(format!(
                "field '{key}' cannot be changed by a mutation"
            )));
        }
        self.fields.remove("modified");
        Ok(self)
    }
}

/// What `retry` decided for a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// A successor record was inserted.
    Respawned {
        previous: JobId,
        id: JobId,
        attempt: u32,
    },
    /// Attempt ceiling reached; nothing was inserted.
    PermanentlyFailed { id: JobId, attempts: u32 },
}

impl RetryOutcome {
    pub fn respawned_id(&self) -> Option<JobId> {
        match self {
            RetryOutcome::Respawned { id, .. } => Some(*id),
            RetryOutcome::PermanentlyFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labstore_core::{ContainerId, ContainerKind};

    #[test]
    fn state_round_trips_through_str() {
        for s in JobState::ALL {
            assert_eq!(s.as_str().parse::<JobState>().unwrap(), s);
        }
        assert!("queued".parse::<JobState>().is_err());
    }

    #[test]
    fn only_pending_and_running_are_mutable() {
        assert!(JobState::Pending.allows_mutation());
        assert!(JobState::Running.allows_mutation());
        assert!(!JobState::Failed.allows_mutation());
        assert!(!JobState::Complete.allows_mutation());
        assert!(JobState::Failed.is_terminal() && JobState::Complete.is_terminal());
    }

    #[test]
    fn new_job_starts_pending_at_attempt_zero() {
        let now = Utc::now();
        let job = NewJob::named("dcm2niix").with_tags(["mri"]).into_job(now);

        assert_eq!(job.id, None);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.previous_job_id, None);
        assert_eq!(job.created, now);
        assert_eq!(job.modified, now);
        assert_eq!(job.tags, vec!["mri".to_string()]);
    }

    #[test]
    fn blank_name_is_invalid() {
        assert!(NewJob::named("  ").validate().is_err());
        assert!(NewJob::named("qa").with_tags([""]).validate().is_err());
        assert!(NewJob::named("qa").validate().is_ok());
    }

    #[test]
    fn respawn_links_lineage_and_bumps_attempt() {
        let t0 = Utc::now();
        let mut failed = NewJob::named("qa").into_job(t0);
        let original_id = JobId::new();
        failed.id = Some(original_id);
        failed.state = JobState::Failed;
        failed.request = Some(serde_json::json!({"target": {}}));
        failed
            .fields
            .insert("progress".to_string(), serde_json::json!(40));

        let t1 = t0 + chrono::Duration::seconds(5);
        let next = failed.respawn(t1);

        assert_eq!(next.id, None);
        assert_eq!(next.state, JobState::Pending);
        assert_eq!(next.attempt, 1);
        assert_eq!(next.previous_job_id, Some(original_id));
        assert_eq!(next.request, None);
        assert_eq!(next.modified, t1);
        assert_eq!(next.fields["progress"], 40);
        assert_eq!(failed.state, JobState::Failed);
    }

    #[test]
    fn mutation_deserializes_from_flat_object() {
        let m: JobMutation =
            serde_json::from_value(serde_json::json!({"state": "complete", "progress": 100}))
                .unwrap();
        assert_eq!(m.state, Some(JobState::Complete));
        assert_eq!(m.fields["progress"], 100);
        assert!(!m.fields.contains_key("state"));
    }

    #[test]
    fn sanitize_rejects_protected_fields_and_drops_modified() {
        let bad = JobMutation::heartbeat().with_field("attempt", serde_json::json!(0));
        assert!(bad.sanitize().is_err());

        let ok = JobMutation::heartbeat()
            .with_field("modified", serde_json::json!("1970-01-01T00:00:00Z"))
            .with_field("progress", serde_json::json!(10))
            .sanitize()
            .unwrap();
        assert!(!ok.fields.contains_key("modified"));
        assert_eq!(ok.fields["progress"], 10);
    }

    #[test]
    fn input_path_points_at_container_file() {
        let id = ContainerId::new();
        let input = JobInput::new(ContainerRef::new(ContainerKind::Acquisition, id), "t1.dcm");
        assert_eq!(input.file_path(), format!("/acquisitions/{id}/files/t1.dcm"));

        let v = serde_json::to_value(&input).unwrap();
        assert_eq!(v["type"], "acquisition");
        assert_eq!(v["name"], "t1.dcm");
    }
}
