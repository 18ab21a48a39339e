//! Data check engine.
//!
//! This crate provides:
//! - Block ingestion and balance computation
//! - Active and inactive balance reconciliation
//! - The check orchestrator and verdict classification
//! - Windowed localization of blocks with missing operations

/// Prelude module for convenient imports.
pub mod prelude;

/// Abort fan-out across pipelines.
pub mod cancellation;
/// Check configuration.
pub mod config;
/// Access to the node being checked.
pub mod fetcher;
/// Search for blocks with missing operations.
pub mod localizer;
/// Check orchestration.
pub mod orchestrator;
/// Outcome classification.
pub mod outcome;
/// Sync + reconcile pipeline.
pub mod pipeline;
/// Balance reconciliation.
pub mod reconcile;
/// Progress reporting.
pub mod stats;
/// Sequential block ingestion.
pub mod sync;

#[cfg(test)]
mod testing;
