//! Infrastructure layer: job queue, storage adapters, configuration.

pub mod config;
pub mod jobs;
