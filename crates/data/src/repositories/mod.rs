//! Storage implementations backed by a local store.
//!
//! A [`LocalStore`] is one exclusively owned storage instance. Block, balance
//! and counter storages are cheap handles onto the same instance.

mod balance_repository;
mod block_repository;
mod counter_repository;

pub use balance_repository::{BalanceChange, BalanceRecord, BalanceStorage, BootstrapBalance};
pub use block_repository::{BlockBatch, BlockStorage};
pub use counter_repository::CounterStorage;

use crate::error::StorageError;
use ledger_check_domain::entities::{AccountCurrency, BlockIdentifier};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

const STORE_FILE: &str = "store.json";

/// Commits between two flushes of a persistent store.
pub const DEFAULT_FLUSH_INTERVAL: usize = 64;

/// In-memory state of a store instance.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) blocks: BTreeMap<i64, BlockIdentifier>,
    pub(crate) balances: HashMap<AccountCurrency, BalanceRecord>,
    pub(crate) counters: BTreeMap<String, U256>,
    pub(crate) closed: bool,
    pub(crate) unflushed_commits: usize,
}

impl StoreState {
    pub(crate) fn head(&self) -> Option<&BlockIdentifier> {
        self.blocks.values().next_back()
    }

    pub(crate) fn increment(&mut self, name: &str, amount: U256) -> U256 {
        let entry = self.counters.entry(name.to_string()).or_default();
        *entry = entry.saturating_add(amount);
        *entry
    }
}

/// On-disk representation of a store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    blocks: Vec<BlockIdentifier>,
    balances: Vec<BalanceRecord>,
    counters: BTreeMap<String, U256>,
}

impl From<StoreSnapshot> for StoreState {
    fn from(snapshot: StoreSnapshot) -> Self {
        Self {
            blocks: snapshot
                .blocks
                .into_iter()
                .map(|block| (block.index, block))
                .collect(),
            balances: snapshot
                .balances
                .into_iter()
                .map(|record| (record.account_currency.clone(), record))
                .collect(),
            counters: snapshot.counters,
            closed: false,
            unflushed_commits: 0,
        }
    }
}

impl From<&StoreState> for StoreSnapshot {
    fn from(state: &StoreState) -> Self {
        let mut balances: Vec<BalanceRecord> = state.balances.values().cloned().collect();
        balances.sort_by(|a, b| a.account_currency.cmp(&b.account_currency));
        Self {
            blocks: state.blocks.values().cloned().collect(),
            balances,
            counters: state.counters.clone(),
        }
    }
}

/// A storage instance rooted at a directory.
#[derive(Clone)]
pub struct LocalStore {
    id: Uuid,
    path: Arc<PathBuf>,
    persist: bool,
    flush_interval: usize,
    state: Arc<RwLock<StoreState>>,
}

impl LocalStore {
    /// Opens the store at `dir`, loading previously persisted state.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the persisted
    /// state cannot be read.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let file = dir.join(STORE_FILE);
        let state = match tokio::fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice::<StoreSnapshot>(&bytes)?.into(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        let store = Self::with_state(dir, true, state);
        info!(
            store = %store.id,
            path = %dir.display(),
            head = ?store.state.read().await.head().map(|b| b.index),
            "Opened local store"
        );
        Ok(store)
    }

    /// Opens an empty store at `dir` that is never written to disk.
    #[must_use]
    pub fn scratch(dir: impl AsRef<Path>) -> Self {
        Self::with_state(dir.as_ref(), false, StoreState::default())
    }

    fn with_state(dir: &Path, persist: bool, state: StoreState) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: Arc::new(dir.to_path_buf()),
            persist,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Sets how many commits may accumulate before state is written to
    /// disk. Zero is treated as one.
    #[must_use]
    pub fn with_flush_interval(mut self, commits: usize) -> Self {
        self.flush_interval = commits.max(1);
        self
    }

    /// Unique identifier of this instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Directory backing this instance.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a BlockStorage handle.
    #[must_use]
    pub fn blocks(&self) -> BlockStorage {
        BlockStorage::new(self.clone())
    }

    /// Creates a BalanceStorage handle.
    #[must_use]
    pub fn balances(&self) -> BalanceStorage {
        BalanceStorage::new(self.clone())
    }

    /// Creates a CounterStorage handle.
    #[must_use]
    pub fn counters(&self) -> CounterStorage {
        CounterStorage::new(self.clone())
    }

    /// Whether the instance has been closed.
    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Flushes persistent state and closes the instance. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    /// Returns an error if the state cannot be written.
    pub async fn close(&self) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Ok(());
        }

        self.flush(&mut state).await?;
        state.closed = true;
        debug!(store = %self.id, persist = self.persist, "Closed local store");
        Ok(())
    }

    /// Records one commit and flushes once the interval is reached.
    pub(crate) async fn committed(&self, state: &mut StoreState) -> Result<(), StorageError> {
        state.unflushed_commits += 1;
        if state.unflushed_commits >= self.flush_interval {
            self.flush(state).await?;
        }
        Ok(())
    }

    /// Writes the state to disk, replacing the previous file atomically.
    pub(crate) async fn flush(&self, state: &mut StoreState) -> Result<(), StorageError> {
        if !self.persist {
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(&StoreSnapshot::from(&*state))?;
        let tmp = self.path.join(format!("{STORE_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.path.join(STORE_FILE)).await?;
        state.unflushed_commits = 0;
        debug!(store = %self.id, head = ?state.head().map(|b| b.index), "Flushed local store");
        Ok(())
    }

    /// Marks the instance closed without flushing, if nobody holds it.
    pub(crate) fn close_now(&self) {
        if let Ok(mut state) = self.state.try_write() {
            state.closed = true;
        }
    }

    pub(crate) async fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StorageError> {
        let state = self.state.read().await;
        if state.closed {
            return Err(StorageError::Closed);
        }
        Ok(state)
    }

    pub(crate) async fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StorageError> {
        let state = self.state.write().await;
        if state.closed {
            return Err(StorageError::Closed);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_check_domain::counters::BLOCK_COUNTER;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = LocalStore::open(dir.path()).await.unwrap();
        let mut batch = BlockBatch::new(BlockIdentifier::new(0, "genesis"));
        batch.count(BLOCK_COUNTER, U256::one());
        store.blocks().commit(&batch).await.unwrap();
        store.close().await.unwrap();

        let reopened = LocalStore::open(dir.path()).await.unwrap();
        let head = reopened.blocks().head_block().await.unwrap();
        assert_eq!(head, Some(BlockIdentifier::new(0, "genesis")));
        assert_eq!(
            reopened.counters().get(BLOCK_COUNTER).await.unwrap(),
            U256::one()
        );
    }

    fn batch(index: i64) -> BlockBatch {
        let mut batch = BlockBatch::new(BlockIdentifier::new(index, format!("h{index}")));
        batch.count(BLOCK_COUNTER, U256::one());
        batch
    }

    #[tokio::test]
    async fn test_commits_survive_without_close() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = LocalStore::open(dir.path())
                .await
                .unwrap()
                .with_flush_interval(2);
            for index in 0..5 {
                store.blocks().commit(&batch(index)).await.unwrap();
            }
        }

        // Dropped without close: the last flush happened after block 3.
        let reopened = LocalStore::open(dir.path()).await.unwrap();
        let head = reopened.blocks().head_block().await.unwrap();
        assert_eq!(head, Some(BlockIdentifier::new(3, "h3")));
        assert_eq!(
            reopened.counters().get(BLOCK_COUNTER).await.unwrap(),
            U256::from(4)
        );
        reopened.blocks().commit(&batch(4)).await.unwrap();
    }

    #[tokio::test]
    async fn test_scratch_store_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path()).with_flush_interval(1);
        store.blocks().commit(&batch(0)).await.unwrap();
        store.close().await.unwrap();

        assert!(!dir.path().join(STORE_FILE).exists());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(store.is_closed().await);
        assert!(matches!(
            store.blocks().head_block().await,
            Err(StorageError::Closed)
        ));
    }
}
