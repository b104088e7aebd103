//! Ingestion and entity-resolution pipeline for offline community event
//! listings: a paginating page walker with incremental-stop heuristics, a
//! dedup/clean/validate data-quality pipeline, a rule-based + fuzzy city
//! mapping engine, and the statistics/quality-report aggregation consumed by
//! the static rendering layer.

pub mod apis;
pub mod assets;
pub mod config;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod types;
