//! Storage error types.

use ledger_check_domain::entities::BlockIdentifier;
use thiserror::Error;

/// Errors raised by a storage instance.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted state could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The instance was already closed.
    #[error("storage instance is closed")]
    Closed,
    /// Balances can only be bootstrapped before the first block is stored.
    #[error("cannot bootstrap balances, already synced up to block {head}")]
    AlreadySyncing {
        /// Current head block.
        head: BlockIdentifier,
    },
    /// A block was committed that does not extend the current head.
    #[error("block {got} does not extend head block {head}")]
    OutOfOrder {
        /// Current head block.
        head: BlockIdentifier,
        /// Rejected block.
        got: BlockIdentifier,
    },
}
