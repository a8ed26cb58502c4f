//! `labstore-core` — domain building blocks shared by every labstore crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod container;
pub mod error;
pub mod id;

pub use container::{ContainerKind, ContainerRef};
pub use error::{DomainError, DomainResult};
pub use id::{ContainerId, JobId};
