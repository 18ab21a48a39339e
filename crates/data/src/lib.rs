//! Storage for the ledger checker.
//!
//! This crate provides the persistence used by every pipeline instance:
//! - A local store that owns block, balance and counter state
//! - Atomic per-block commits
//! - Balance bootstrapping from a manifest
//! - Disposable storage for diagnostic runs

/// Disposable storage instances.
pub mod ephemeral;
/// Error types.
pub mod error;
/// Storage implementations.
pub mod repositories;

pub use ephemeral::{EphemeralStorage, StorageProvisioner, TempDirProvisioner};
pub use error::StorageError;
pub use repositories::{
    BalanceChange, BalanceRecord, BalanceStorage, BlockBatch, BlockStorage, BootstrapBalance,
    CounterStorage, LocalStore,
};
