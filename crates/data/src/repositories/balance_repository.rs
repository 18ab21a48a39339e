//! Balance storage for computed account balances.

use super::LocalStore;
use crate::error::StorageError;
use ledger_check_domain::counters::SEEN_ACCOUNT_COUNTER;
use ledger_check_domain::entities::{AccountCurrency, BlockIdentifier};
use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Computed balance of an account currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    /// Account currency the balance belongs to.
    pub account_currency: AccountCurrency,
    /// Computed balance.
    pub value: Decimal,
    /// Block at which the balance last changed.
    pub block: BlockIdentifier,
}

/// A balance change staged by a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    /// Account currency that changed.
    pub account_currency: AccountCurrency,
    /// Block that caused the change.
    pub block: BlockIdentifier,
    /// Net change applied by the block.
    pub difference: Decimal,
    /// Balance after the block.
    pub value: Decimal,
    /// Whether the account currency was first seen in this block.
    pub new_account: bool,
}

/// Entry of a balance bootstrap manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapBalance {
    /// Account currency to seed.
    pub account_currency: AccountCurrency,
    /// Balance at genesis.
    pub value: Decimal,
}

/// Storage of computed balances.
#[derive(Clone)]
pub struct BalanceStorage {
    store: LocalStore,
}

impl BalanceStorage {
    pub(crate) fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Returns the computed balance of `account_currency`.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn get(
        &self,
        account_currency: &AccountCurrency,
    ) -> Result<Option<BalanceRecord>, StorageError> {
        Ok(self
            .store
            .read()
            .await?
            .balances
            .get(account_currency)
            .cloned())
    }

    /// Returns the computed balance together with the head block, read
    /// atomically. `None` if the account is unknown or nothing was synced.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn snapshot(
        &self,
        account_currency: &AccountCurrency,
    ) -> Result<Option<(BalanceRecord, BlockIdentifier)>, StorageError> {
        let state = self.store.read().await?;
        let Some(head) = state.head() else {
            return Ok(None);
        };
        Ok(state
            .balances
            .get(account_currency)
            .map(|record| (record.clone(), head.clone())))
    }

    /// Returns every account currency with a computed balance.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn all_account_currencies(&self) -> Result<Vec<AccountCurrency>, StorageError> {
        let mut accounts: Vec<AccountCurrency> =
            self.store.read().await?.balances.keys().cloned().collect();
        accounts.sort();
        Ok(accounts)
    }

    /// Seeds balances at `genesis` from a JSON manifest.
    ///
    /// Only valid before the first block is stored.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be read or a block was already
    /// synced.
    pub async fn bootstrap_balances(
        &self,
        manifest: impl AsRef<Path>,
        genesis: &BlockIdentifier,
    ) -> Result<usize, StorageError> {
        let bytes = tokio::fs::read(manifest.as_ref()).await?;
        let entries: Vec<BootstrapBalance> = serde_json::from_slice(&bytes)?;

        let mut state = self.store.write().await?;
        if let Some(head) = state.head() {
            return Err(StorageError::AlreadySyncing { head: head.clone() });
        }

        let mut seeded = 0u64;
        for entry in &entries {
            let previous = state.balances.insert(
                entry.account_currency.clone(),
                BalanceRecord {
                    account_currency: entry.account_currency.clone(),
                    value: entry.value,
                    block: genesis.clone(),
                },
            );
            if previous.is_none() {
                seeded += 1;
            }
        }
        state.increment(SEEN_ACCOUNT_COUNTER, U256::from(seeded));
        self.store.flush(&mut state).await?;

        info!(
            manifest = %manifest.as_ref().display(),
            accounts = entries.len(),
            "Bootstrapped balances"
        );
        Ok(entries.len())
    }
}
