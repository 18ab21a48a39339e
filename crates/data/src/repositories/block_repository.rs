//! Block storage and atomic block commits.

use super::{BalanceChange, BalanceRecord, LocalStore};
use crate::error::StorageError;
use ledger_check_domain::entities::BlockIdentifier;
use primitive_types::U256;
use tracing::debug;

/// Everything written for a single block, committed in one step.
#[derive(Debug, Clone)]
pub struct BlockBatch {
    /// Block being committed.
    pub block: BlockIdentifier,
    /// Balance changes staged by block workers.
    pub balance_changes: Vec<BalanceChange>,
    /// Counter increments staged by block workers.
    pub counters: Vec<(&'static str, U256)>,
}

impl BlockBatch {
    /// Creates an empty batch for `block`.
    #[must_use]
    pub fn new(block: BlockIdentifier) -> Self {
        Self {
            block,
            balance_changes: Vec::new(),
            counters: Vec::new(),
        }
    }

    /// Stages a counter increment.
    pub fn count(&mut self, name: &'static str, amount: U256) {
        self.counters.push((name, amount));
    }
}

/// Storage of ingested block identifiers.
#[derive(Clone)]
pub struct BlockStorage {
    store: LocalStore,
}

impl BlockStorage {
    pub(crate) fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Returns the most recently committed block, if any.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn head_block(&self) -> Result<Option<BlockIdentifier>, StorageError> {
        Ok(self.store.read().await?.head().cloned())
    }

    /// Returns the committed block at `index`.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn get_block(&self, index: i64) -> Result<Option<BlockIdentifier>, StorageError> {
        Ok(self.store.read().await?.blocks.get(&index).cloned())
    }

    /// Commits a block together with its staged balance changes and counter
    /// increments. Readers never observe a partially applied batch.
    ///
    /// # Errors
    /// Returns an error if the store is closed, the block does not extend
    /// the current head, or a due flush fails.
    pub async fn commit(&self, batch: &BlockBatch) -> Result<(), StorageError> {
        let mut state = self.store.write().await?;

        if let Some(head) = state.head()
            && batch.block.index != head.index + 1
        {
            return Err(StorageError::OutOfOrder {
                head: head.clone(),
                got: batch.block.clone(),
            });
        }

        for change in &batch.balance_changes {
            state.balances.insert(
                change.account_currency.clone(),
                BalanceRecord {
                    account_currency: change.account_currency.clone(),
                    value: change.value,
                    block: change.block.clone(),
                },
            );
        }

        for (name, amount) in &batch.counters {
            state.increment(name, *amount);
        }

        debug!(
            block = %batch.block,
            changes = batch.balance_changes.len(),
            "Committed block"
        );
        state.blocks.insert(batch.block.index, batch.block.clone());
        self.store.committed(&mut state).await
    }
}
