//! Legal job state changes.
//!
//! ```text
//!   pending ──► running ──► complete
//!                  │
//!                  └──────► failed
//! ```
//!
//! A retry never moves a record out of `failed`; it inserts a new record.

use super::types::JobState;

/// Declared edges of the job state machine.
pub const JOB_TRANSITIONS: &[(JobState, JobState)] = &[
    (JobState::Pending, JobState::Running),
    (JobState::Running, JobState::Failed),
    (JobState::Running, JobState::Complete),
];

/// Whether `from → to` is allowed.
///
/// Staying in the same state is always allowed (a mutation that only touches
/// auxiliary fields or the heartbeat).
pub fn valid_transition(from: JobState, to: JobState) -> bool {
    from == to || JOB_TRANSITIONS.contains(&(from, to))
}
