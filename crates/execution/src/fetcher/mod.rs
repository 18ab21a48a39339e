//! Access to the node being checked.
//!
//! The checker only depends on the [`Fetcher`] contract. Implementations
//! must be safe to share between pipeline instances.

mod recorded;

pub use recorded::{BalanceSnapshot, ChainFixture, RecordedChainFetcher};

use async_trait::async_trait;
use ledger_check_domain::entities::{AccountCurrency, Block, BlockIdentifier, NetworkIdentifier};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors returned by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Temporary failure, the request may be retried.
    #[error("transient fetch error: {0}")]
    Transient(String),
    /// The requested data does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The recorded chain could not be loaded.
    #[error("unable to load recorded chain: {0}")]
    Fixture(String),
}

/// Identity and bounds of the network served by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    /// Network identifier.
    pub network: NetworkIdentifier,
    /// Genesis block.
    pub genesis_block: BlockIdentifier,
    /// Current tip.
    pub current_block: BlockIdentifier,
}

/// Source of blocks and live balances.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the network identity, genesis and tip.
    async fn network_status(&self) -> Result<NetworkStatus, FetchError>;

    /// Returns the block at `index`, or `None` if it is not available yet.
    async fn block(&self, index: i64) -> Result<Option<Block>, FetchError>;

    /// Returns the balance reported by the node at `at`, or at the tip when
    /// `at` is `None`, together with the block it applies to.
    async fn balance(
        &self,
        account_currency: &AccountCurrency,
        at: Option<&BlockIdentifier>,
    ) -> Result<(BlockIdentifier, Decimal), FetchError>;
}
