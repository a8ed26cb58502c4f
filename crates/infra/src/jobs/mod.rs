//! Job queue: records, transitions, storage, request generation, and the
//! orphan reaper.
//!
//! ## Design
//!
//! - A job is a single document; a retry inserts a new document linked through
//!   `previous_job_id` and never rewrites the failed one
//! - Claims are FIFO by `modified` and exclusive per record
//! - Running jobs heartbeat by mutating; stale ones are failed by the orphan scan
//! - Storage is a small set of atomic primitives ([`JobStore`]), so the queue
//!   itself holds no locks
//!
//! ## Components
//!
//! - [`Queue`]: claim, mutate, retry, orphan scan, statistics
//! - [`JobStore`]: persistence port ([`InMemoryJobStore`], [`PostgresJobStore`])
//! - [`JobTypeRegistry`]: per-type request generators
//! - [`OrphanReaper`]: periodic orphan scan on a background thread

pub mod postgres;
pub mod queue;
pub mod reaper;
pub mod requests;
pub mod store;
pub mod transitions;
pub mod types;

pub use postgres::PostgresJobStore;
pub use queue::{Queue, QueueError, QueueStatistics, TagCount};
pub use reaper::{OrphanReaper, OrphanReaperConfig, OrphanReaperHandle, ReaperStats};
pub use requests::{
    EngineRequest, EngineRequestGenerator, JobTypeRegistry, RequestError, RequestGenerator,
};
pub use store::{
    GroupKey, GroupValue, InMemoryJobStore, JobFilter, JobSort, JobStore, JobStoreError, JobUpdate,
};
pub use transitions::{JOB_TRANSITIONS, valid_transition};
pub use types::{Job, JobInput, JobMutation, JobState, NewJob, RetryOutcome};
