//! Computes balances from block operations.

use super::{BlockWorker, WorkerError};
use crate::fetcher::Fetcher;
use crate::reconcile::ReconcileError;
use crate::stats::StatsLogger;
use async_trait::async_trait;
use ledger_check_data::{BalanceChange, BalanceStorage, BlockBatch};
use ledger_check_domain::counters::SEEN_ACCOUNT_COUNTER;
use ledger_check_domain::entities::{AccountCurrency, Block};
use primitive_types::U256;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Receives the balance changes of every committed block.
#[async_trait]
pub trait BalanceUpdateObserver: Send + Sync {
    /// Handles the changes of `block`. The syncer does not advance until
    /// this returns.
    async fn balances_changed(
        &self,
        block: &Block,
        changes: Vec<BalanceChange>,
    ) -> Result<(), ReconcileError>;
}

/// Block worker maintaining computed balances.
pub struct BalanceWorker {
    fetcher: Arc<dyn Fetcher>,
    balances: BalanceStorage,
    lookup_balance_by_block: bool,
    observer: Option<Arc<dyn BalanceUpdateObserver>>,
    interesting_account: Option<AccountCurrency>,
    logger: StatsLogger,
}

impl BalanceWorker {
    /// Creates a worker writing to `balances`.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        balances: BalanceStorage,
        lookup_balance_by_block: bool,
        logger: StatsLogger,
    ) -> Self {
        Self {
            fetcher,
            balances,
            lookup_balance_by_block,
            observer: None,
            interesting_account: None,
            logger,
        }
    }

    /// Notifies `observer` after every committed block.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BalanceUpdateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Only forwards changes of `account_currency` to the observer.
    #[must_use]
    pub fn restrict_to(mut self, account_currency: AccountCurrency) -> Self {
        self.interesting_account = Some(account_currency);
        self
    }

    /// Balance an account currency had before `block`, when first seen in
    /// it.
    async fn opening_balance(
        &self,
        block: &Block,
        account_currency: &AccountCurrency,
    ) -> Result<Decimal, WorkerError> {
        if block.is_genesis() || !self.lookup_balance_by_block {
            return Ok(Decimal::ZERO);
        }

        let (_, value) = self
            .fetcher
            .balance(account_currency, Some(&block.parent_identifier))
            .await?;
        debug!(
            account = %account_currency,
            parent = %block.parent_identifier,
            value = %value,
            "Fetched opening balance"
        );
        Ok(value)
    }
}

#[async_trait]
impl BlockWorker for BalanceWorker {
    async fn stage_block(&self, block: &Block, batch: &mut BlockBatch) -> Result<(), WorkerError> {
        let mut new_accounts = 0u64;
        for (account_currency, difference) in block.balance_deltas() {
            let (previous, new_account) = match self.balances.get(&account_currency).await? {
                Some(record) => (record.value, false),
                None => (self.opening_balance(block, &account_currency).await?, true),
            };
            if new_account {
                new_accounts += 1;
            }

            batch.balance_changes.push(BalanceChange {
                account_currency,
                block: block.identifier.clone(),
                difference,
                value: previous + difference,
                new_account,
            });
        }

        if new_accounts > 0 {
            batch.count(SEEN_ACCOUNT_COUNTER, U256::from(new_accounts));
        }
        Ok(())
    }

    async fn block_committed(&self, block: &Block, batch: &BlockBatch) -> Result<(), WorkerError> {
        self.logger.log_balance_changes(&batch.balance_changes);

        let Some(observer) = &self.observer else {
            return Ok(());
        };

        let changes: Vec<BalanceChange> = batch
            .balance_changes
            .iter()
            .filter(|change| {
                self.interesting_account
                    .as_ref()
                    .is_none_or(|interesting| *interesting == change.account_currency)
            })
            .cloned()
            .collect();
        observer.balances_changed(block, changes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{ChainFixture, RecordedChainFetcher};
    use crate::stats::LogOptions;
    use ledger_check_data::LocalStore;
    use ledger_check_domain::entities::{
        AccountIdentifier, Amount, BlockIdentifier, Currency, NetworkIdentifier, Operation,
        Transaction,
    };
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn account(address: &str) -> AccountCurrency {
        AccountCurrency::new(AccountIdentifier::new(address), Currency::new("ETH", 18))
    }

    fn block(index: i64, ops: &[(&str, Decimal)]) -> Block {
        Block {
            identifier: BlockIdentifier::new(index, format!("h{index}")),
            parent_identifier: BlockIdentifier::new(
                (index - 1).max(0),
                format!("h{}", (index - 1).max(0)),
            ),
            transactions: vec![Transaction {
                hash: format!("tx{index}"),
                operations: ops
                    .iter()
                    .enumerate()
                    .map(|(i, (address, value))| Operation {
                        index: i as u64,
                        account: AccountIdentifier::new(*address),
                        amount: Amount::new(*value, Currency::new("ETH", 18)),
                    })
                    .collect(),
            }],
        }
    }

    fn fetcher(blocks: Vec<Block>) -> Arc<dyn Fetcher> {
        Arc::new(
            RecordedChainFetcher::new(ChainFixture::from_history(
                NetworkIdentifier::new("ethereum", "mainnet"),
                blocks,
            ))
            .unwrap(),
        )
    }

    #[derive(Default)]
    struct CollectingObserver {
        seen: Mutex<Vec<AccountCurrency>>,
    }

    #[async_trait]
    impl BalanceUpdateObserver for CollectingObserver {
        async fn balances_changed(
            &self,
            _block: &Block,
            changes: Vec<BalanceChange>,
        ) -> Result<(), ReconcileError> {
            let mut seen = self.seen.lock().unwrap();
            seen.extend(changes.into_iter().map(|c| c.account_currency));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_new_account_starts_from_parent_balance() {
        let history = vec![
            block(0, &[("alice", dec!(10))]),
            block(1, &[("alice", dec!(5))]),
            block(2, &[("alice", dec!(-3)), ("bob", dec!(3))]),
        ];
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let logger = StatsLogger::new(store.counters(), LogOptions::default());
        let worker = BalanceWorker::new(fetcher(history.clone()), store.balances(), true, logger);

        // Syncing from block 2 only: alice already held 15 before it.
        let mut batch = BlockBatch::new(history[2].identifier.clone());
        worker.stage_block(&history[2], &mut batch).await.unwrap();

        let alice = &batch.balance_changes[0];
        assert_eq!(alice.account_currency, account("alice"));
        assert_eq!(alice.value, dec!(12));
        assert!(alice.new_account);
        assert_eq!(batch.balance_changes[1].value, dec!(3));
        assert_eq!(
            batch.counters,
            vec![(SEEN_ACCOUNT_COUNTER, U256::from(2))]
        );
    }

    #[tokio::test]
    async fn test_without_lookup_new_accounts_start_at_zero() {
        let history = vec![block(0, &[("alice", dec!(10))]), block(1, &[("alice", dec!(5))])];
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let logger = StatsLogger::new(store.counters(), LogOptions::default());
        let worker = BalanceWorker::new(fetcher(history.clone()), store.balances(), false, logger);

        let mut batch = BlockBatch::new(history[1].identifier.clone());
        worker.stage_block(&history[1], &mut batch).await.unwrap();
        assert_eq!(batch.balance_changes[0].value, dec!(5));
    }

    #[tokio::test]
    async fn test_existing_balance_accumulates() {
        let history = vec![block(0, &[("alice", dec!(10))]), block(1, &[("alice", dec!(5))])];
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let logger = StatsLogger::new(store.counters(), LogOptions::default());
        let worker = BalanceWorker::new(fetcher(history.clone()), store.balances(), true, logger);

        for block in &history {
            let mut batch = BlockBatch::new(block.identifier.clone());
            worker.stage_block(block, &mut batch).await.unwrap();
            store.blocks().commit(&batch).await.unwrap();
        }

        let record = store.balances().get(&account("alice")).await.unwrap().unwrap();
        assert_eq!(record.value, dec!(15));
        assert_eq!(record.block.index, 1);
    }

    #[tokio::test]
    async fn test_observer_sees_only_interesting_account() {
        let history = vec![block(0, &[("alice", dec!(1)), ("bob", dec!(2))])];
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let logger = StatsLogger::new(store.counters(), LogOptions::default());
        let observer = Arc::new(CollectingObserver::default());
        let worker = BalanceWorker::new(fetcher(history.clone()), store.balances(), true, logger)
            .with_observer(observer.clone())
            .restrict_to(account("bob"));

        let mut batch = BlockBatch::new(history[0].identifier.clone());
        worker.stage_block(&history[0], &mut batch).await.unwrap();
        worker.block_committed(&history[0], &batch).await.unwrap();

        assert_eq!(*observer.seen.lock().unwrap(), vec![account("bob")]);
    }
}
