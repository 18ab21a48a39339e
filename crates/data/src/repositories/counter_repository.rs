//! Monotonic named counters.

use super::LocalStore;
use crate::error::StorageError;
use ledger_check_domain::counters::ALL_COUNTERS;
use primitive_types::U256;
use std::collections::BTreeMap;

/// Storage of monotonic counters, private to one store instance.
#[derive(Clone)]
pub struct CounterStorage {
    store: LocalStore,
}

impl CounterStorage {
    pub(crate) fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Adds `amount` to the counter `name` and returns the new value.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn update(&self, name: &str, amount: U256) -> Result<U256, StorageError> {
        Ok(self.store.write().await?.increment(name, amount))
    }

    /// Returns the value of counter `name` (zero if never updated).
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn get(&self, name: &str) -> Result<U256, StorageError> {
        Ok(self
            .store
            .read()
            .await?
            .counters
            .get(name)
            .copied()
            .unwrap_or_default())
    }

    /// Returns every counter, well-known counters included even when never
    /// updated.
    ///
    /// # Errors
    /// Returns an error if the store is closed.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, U256>, StorageError> {
        let mut counters = self.store.read().await?.counters.clone();
        for name in ALL_COUNTERS {
            counters.entry(name.to_string()).or_default();
        }
        Ok(counters)
    }
}
