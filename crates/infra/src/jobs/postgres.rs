//! Postgres-backed job store.
//!
//! ## Atomicity
//!
//! Each [`JobStore`] primitive is a single SQL statement:
//!
//! - `find_and_update` with a sort hint selects its target with
//!   `FOR UPDATE SKIP LOCKED`, so concurrent claimers never wait on (or win)
//!   the same row.
//! - `update_one_conditional` and `find_and_update` without a sort lock with
//!   plain `FOR UPDATE`; Postgres re-checks the filter after the lock is
//!   granted, so a write against a stale snapshot matches nothing.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (insert only) |
//! | Database (check violation) | `23514` | `Serialization` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! ## Runtime
//!
//! sqlx is async while [`JobStore`] is not. The store keeps the tokio runtime
//! handle it was built with and blocks on it, so trait methods must be called
//! from outside async tasks (`spawn_blocking`, plain threads).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use labstore_core::{ContainerRef, JobId};

use super::store::{
    GroupKey, GroupValue, JobFilter, JobSort, JobStore, JobStoreError, JobUpdate,
};
use super::types::{Job, JobInput, JobState};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id              UUID PRIMARY KEY,
        name            TEXT NOT NULL,
        inputs          JSONB NOT NULL DEFAULT '{}'::jsonb,
        destination     JSONB,
        config          JSONB NOT NULL DEFAULT 'null'::jsonb,
        state           TEXT NOT NULL
                        CHECK (state IN ('pending', 'running', 'failed', 'complete')),
        attempt         INTEGER NOT NULL CHECK (attempt >= 0),
        previous_job_id UUID,
        created         TIMESTAMPTZ NOT NULL,
        modified        TIMESTAMPTZ NOT NULL,
        tags            TEXT[] NOT NULL DEFAULT '{}',
        request         JSONB,
        fields          JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_state_modified_idx ON jobs (state, modified)",
    "CREATE INDEX IF NOT EXISTS jobs_previous_job_idx ON jobs (previous_job_id)",
];

const COLUMNS: &str = "id, name, inputs, destination, config, state, attempt, previous_job_id, \
                       created, modified, tags, request, fields";

/// Filter over bind parameters `$1..$4`; unset parameters match everything.
const FILTER: &str = "($1::uuid IS NULL OR id = $1) \
                      AND ($2::text IS NULL OR state = $2) \
                      AND ($3::timestamptz IS NULL OR modified < $3) \
                      AND ($4::int4 IS NULL OR attempt >= $4)";

/// Assignments over bind parameters `$5..$8`.
const SET: &str = "state = COALESCE($5::text, state), \
                   modified = COALESCE($6::timestamptz, modified), \
                   request = COALESCE($7::jsonb, request), \
                   fields = fields || $8::jsonb";

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresJobStore {
    /// Wrap a pool; `runtime` drives the sync [`JobStore`] methods.
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Connect and capture the current runtime. Must be called inside tokio.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, Handle::current()))
    }

    /// Create the `jobs` table and its indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_type = %job.name), err)]
    pub async fn insert_job(&self, mut job: Job) -> Result<JobId, JobStoreError> {
        let id = *job.id.get_or_insert_with(JobId::new);
        let inputs = to_json(&job.inputs)?;
        let destination = job.destination.as_ref().map(to_json).transpose()?;

        sqlx::query(&format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(id.as_uuid())
        .bind(&job.name)
        .bind(inputs)
        .bind(destination)
        .bind(&job.config)
        .bind(job.state.as_str())
        .bind(attempt_param(job.attempt)?)
        .bind(job.previous_job_id.map(|p| *p.as_uuid()))
        .bind(job.created)
        .bind(job.modified)
        .bind(&job.tags)
        .bind(&job.request)
        .bind(JsonValue::Object(job.fields.clone()))
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(id)
            } else {
                map_sqlx_error("insert_job", e)
            }
        })?;

        Ok(id)
    }

    #[instrument(skip(self), err)]
    pub async fn find_jobs(
        &self,
        filter: &JobFilter,
        sort: Option<JobSort>,
        limit: Option<usize>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs WHERE {FILTER} ORDER BY {} LIMIT $5",
            order_by(sort)
        );
        let rows = bind_filter(sqlx::query(&sql), filter)?
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_jobs", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn find_and_update_job(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
        sort: Option<JobSort>,
    ) -> Result<Option<Job>, JobStoreError> {
        let lock = if sort.is_some() {
            "FOR UPDATE SKIP LOCKED"
        } else {
            "FOR UPDATE"
        };
        let sql = format!(
            "UPDATE jobs SET {SET} \
             WHERE id = (SELECT id FROM jobs WHERE {FILTER} ORDER BY {} LIMIT 1 {lock}) \
             RETURNING {COLUMNS}",
            order_by(sort)
        );
        let row = bind_update(bind_filter(sqlx::query(&sql), filter)?, update)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_and_update_job", e))?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn update_one_job(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
    ) -> Result<u64, JobStoreError> {
        let sql = format!(
            "UPDATE jobs SET {SET} \
             WHERE id = (SELECT id FROM jobs WHERE {FILTER} LIMIT 1 FOR UPDATE)"
        );
        let result = bind_update(bind_filter(sqlx::query(&sql), filter)?, update)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_one_job", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    pub async fn group_count(&self, key: GroupKey) -> Result<Vec<(GroupValue, u64)>, JobStoreError> {
        let column = match key {
            GroupKey::State => "state",
            GroupKey::Tags => "tags",
        };
        let rows = sqlx::query(&format!(
            "SELECT {column} AS grp, COUNT(*) AS total FROM jobs GROUP BY {column} ORDER BY {column}"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("group_count", e))?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let total: i64 = row.try_get("total").map_err(decode_error)?;
            let group = match key {
                GroupKey::State => {
                    let state: String = row.try_get("grp").map_err(decode_error)?;
                    GroupValue::State(parse_state(&state)?)
                }
                GroupKey::Tags => GroupValue::Tags(row.try_get("grp").map_err(decode_error)?),
            };
            groups.push((group, total as u64));
        }
        Ok(groups)
    }

    #[instrument(skip(self), err)]
    pub async fn count_jobs(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        let sql = format!("SELECT COUNT(*) AS total FROM jobs WHERE {FILTER}");
        let row = bind_filter(sqlx::query(&sql), filter)?
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?;
        let total: i64 = row.try_get("total").map_err(decode_error)?;
        Ok(total as u64)
    }
}

impl JobStore for PostgresJobStore {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        self.runtime.block_on(self.insert_job(job))
    }

    fn find_one(&self, filter: &JobFilter) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.runtime.block_on(self.find_jobs(filter, None, Some(1)))?;
        Ok(jobs.into_iter().next())
    }

    fn find(
        &self,
        filter: &JobFilter,
        sort: JobSort,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        self.runtime
            .block_on(self.find_jobs(filter, Some(sort), Some(limit)))
    }

    fn find_and_update(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
        sort: Option<JobSort>,
    ) -> Result<Option<Job>, JobStoreError> {
        self.runtime
            .block_on(self.find_and_update_job(filter, update, sort))
    }

    fn update_one_conditional(
        &self,
        filter: &JobFilter,
        update: &JobUpdate,
    ) -> Result<u64, JobStoreError> {
        self.runtime.block_on(self.update_one_job(filter, update))
    }

    fn aggregate_group_count(&self, key: GroupKey) -> Result<Vec<(GroupValue, u64)>, JobStoreError> {
        self.runtime.block_on(self.group_count(key))
    }

    fn count(&self, filter: &JobFilter) -> Result<u64, JobStoreError> {
        self.runtime.block_on(self.count_jobs(filter))
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_filter<'q>(query: PgQuery<'q>, filter: &JobFilter) -> Result<PgQuery<'q>, JobStoreError> {
    let min_attempt = filter.min_attempt.map(attempt_param).transpose()?;
    Ok(query
        .bind(filter.id.map(|id| *id.as_uuid()))
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.modified_before)
        .bind(min_attempt))
}

fn bind_update<'q>(query: PgQuery<'q>, update: &JobUpdate) -> PgQuery<'q> {
    query
        .bind(update.state.map(|s| s.as_str()))
        .bind(update.modified)
        .bind(update.request.clone())
        .bind(JsonValue::Object(update.fields.clone()))
}

fn order_by(sort: Option<JobSort>) -> &'static str {
    match sort {
        Some(JobSort::ModifiedAsc) => "modified ASC, id ASC",
        Some(JobSort::ModifiedDesc) => "modified DESC, id DESC",
        None => "id ASC",
    }
}

fn attempt_param(attempt: u32) -> Result<i32, JobStoreError> {
    i32::try_from(attempt)
        .map_err(|_| JobStoreError::Serialization(format!("attempt {attempt} out of range")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, JobStoreError> {
    serde_json::to_value(value).map_err(|e| JobStoreError::Serialization(e.to_string()))
}

fn parse_state(s: &str) -> Result<JobState, JobStoreError> {
    s.parse()
        .map_err(|e: labstore_core::DomainError| JobStoreError::Serialization(e.to_string()))
}

fn decode_error(e: sqlx::Error) -> JobStoreError {
    JobStoreError::Serialization(format!("failed to decode job row: {e}"))
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    JobRow::from_row(row).map_err(decode_error)?.try_into()
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => JobStoreError::Serialization(msg),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    name: String,
    inputs: JsonValue,
    destination: Option<JsonValue>,
    config: JsonValue,
    state: String,
    attempt: i32,
    previous_job_id: Option<uuid::Uuid>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    tags: Vec<String>,
    request: Option<JsonValue>,
    fields: JsonValue,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            inputs: row.try_get("inputs")?,
            destination: row.try_get("destination")?,
            config: row.try_get("config")?,
            state: row.try_get("state")?,
            attempt: row.try_get("attempt")?,
            previous_job_id: row.try_get("previous_job_id")?,
            created: row.try_get("created")?,
            modified: row.try_get("modified")?,
            tags: row.try_get("tags")?,
            request: row.try_get("request")?,
            fields: row.try_get("fields")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let inputs: BTreeMap<String, JobInput> = serde_json::from_value(row.inputs)
            .map_err(|e| JobStoreError::Serialization(format!("job inputs: {e}")))?;
        let destination: Option<ContainerRef> = row
            .destination
            .filter(|d| !d.is_null())
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JobStoreError::Serialization(format!("job destination: {e}")))?;
        let fields = match row.fields {
            JsonValue::Object(map) => map,
            other => {
                return Err(JobStoreError::Serialization(format!(
                    "job fields must be an object, got {other}"
                )));
            }
        };

        Ok(Job {
            id: Some(JobId::from_uuid(row.id)),
            name: row.name,
            inputs,
            destination,
            config: row.config,
            state: parse_state(&row.state)?,
            attempt: u32::try_from(row.attempt)
                .map_err(|_| JobStoreError::Serialization(format!("negative attempt {}", row.attempt)))?,
            previous_job_id: row.previous_job_id.map(JobId::from_uuid),
            created: row.created,
            modified: row.modified,
            tags: row.tags,
            request: row.request,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::NewJob;
    use labstore_core::{ContainerId, ContainerKind};

    fn row_for(state: &str, fields: JsonValue) -> JobRow {
        let now = Utc::now();
        JobRow {
            id: uuid::Uuid::now_v7(),
            name: "dcm2niix".to_string(),
            inputs: serde_json::json!({
                "dicom": { "type": "acquisition", "id": uuid::Uuid::now_v7(), "name": "t1.zip" }
            }),
            destination: Some(serde_json::json!({ "type": "session", "id": uuid::Uuid::now_v7() })),
            config: JsonValue::Null,
            state: state.to_string(),
            attempt: 2,
            previous_job_id: None,
            created: now,
            modified: now,
            tags: vec!["mri".to_string()],
            request: None,
            fields,
        }
    }

    #[test]
    fn row_decodes_into_job() {
        let row = row_for("running", serde_json::json!({ "progress": 5 }));
        let id = row.id;
        let job = Job::try_from(row).unwrap();

        assert_eq!(job.id, Some(JobId::from_uuid(id)));
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.attempt, 2);
        assert_eq!(job.inputs["dicom"].container.kind, ContainerKind::Acquisition);
        assert_eq!(job.destination.unwrap().kind, ContainerKind::Session);
        assert_eq!(job.fields["progress"], 5);
    }

    #[test]
    fn row_with_unknown_state_is_rejected() {
        let row = row_for("queued", serde_json::json!({}));
        assert!(matches!(Job::try_from(row), Err(JobStoreError::Serialization(_))));
    }

    #[test]
    fn row_with_non_object_fields_is_rejected() {
        let row = row_for("pending", serde_json::json!([1, 2]));
        assert!(matches!(Job::try_from(row), Err(JobStoreError::Serialization(_))));
    }

    #[test]
    fn sort_hint_selects_order() {
        assert_eq!(order_by(Some(JobSort::ModifiedAsc)), "modified ASC, id ASC");
        assert_eq!(order_by(Some(JobSort::ModifiedDesc)), "modified DESC, id DESC");
        assert_eq!(order_by(None), "id ASC");
    }

    /// Runs against a real database when `DATABASE_URL` is set.
    #[test]
    #[ignore]
    fn postgres_claim_and_conditional_update() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = runtime.block_on(async {
            let store = PostgresJobStore::connect(&url).await.unwrap();
            store.ensure_schema().await.unwrap();
            store
        });

        let job = NewJob::named("pg-test")
            .with_destination(ContainerRef::new(ContainerKind::Project, ContainerId::new()))
            .with_tags(["pg"])
            .into_job(Utc::now() - chrono::Duration::days(3650));
        let id = store.insert(job).unwrap();

        let claimed = store
            .find_and_update(
                &JobFilter::by_id(id).with_state(JobState::Pending),
                &JobUpdate::new().state(JobState::Running).modified(Utc::now()),
                Some(JobSort::ModifiedAsc),
            )
            .unwrap()
            .unwrap();
        assert_eq!(claimed.state, JobState::Running);

        let stale = JobFilter::by_id(id).with_state(JobState::Pending);
        assert_eq!(
            store
                .update_one_conditional(&stale, &JobUpdate::new().state(JobState::Complete))
                .unwrap(),
            0
        );

        let mut fields = serde_json::Map::new();
        fields.insert("progress".to_string(), serde_json::json!(50));
        let current = JobFilter::by_id(id).with_state(JobState::Running);
        assert_eq!(
            store
                .update_one_conditional(&current, &JobUpdate::new().fields(fields))
                .unwrap(),
            1
        );
        let stored = store.find_one(&JobFilter::by_id(id)).unwrap().unwrap();
        assert_eq!(stored.fields["progress"], 50);
        assert_eq!(stored.tags, vec!["pg".to_string()]);
    }
}
