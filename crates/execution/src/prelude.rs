//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use ledger_check_execution::prelude::*;
//! ```

// Cancellation
pub use crate::cancellation::CancellationRegistry;

// Configuration
pub use crate::config::{ConfigError, Configuration, DataConfiguration, load_accounts};

// Fetcher
pub use crate::fetcher::{
    BalanceSnapshot, ChainFixture, FetchError, Fetcher, NetworkStatus, RecordedChainFetcher,
};

// Localization
pub use crate::localizer::{LocalizeError, Localizer};

// Orchestration
pub use crate::orchestrator::{Orchestrator, OrchestratorError};
pub use crate::outcome::{Outcome, TerminalState, classify_outcome};
pub use crate::pipeline::{Pipeline, PipelineError, PipelineSettings};

// Reconciliation
pub use crate::reconcile::{
    AccountState, FailureRecorder, ReconcileError, ReconcileStatus, ReconciliationHandler,
    Reconciler, ReconcilerConfig,
};

// Stats
pub use crate::stats::{LogOptions, StatsLogger};

// Sync
pub use crate::sync::{
    BalanceUpdateObserver, BalanceWorker, BlockWorker, SyncError, Syncer, SyncerConfig,
    WorkerError,
};
