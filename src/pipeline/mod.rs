//! The ingestion and entity-resolution pipeline, stage by stage: page walk,
//! dedup, clean, validate, statistics, and the orchestrator that wires one
//! run together.

pub mod backoff;
pub mod clean;
pub mod dedup;
pub mod orchestrator;
pub mod paginator;
pub mod stats;
pub mod validate;
