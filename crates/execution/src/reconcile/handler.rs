//! Reconciliation result handling.

use super::ReconcileError;
use crate::stats::StatsLogger;
use async_trait::async_trait;
use ledger_check_data::CounterStorage;
use ledger_check_domain::counters::{
    ACTIVE_RECONCILIATION_COUNTER, EXEMPT_RECONCILIATION_COUNTER, FAILED_RECONCILIATION_COUNTER,
    INACTIVE_RECONCILIATION_COUNTER, SKIPPED_RECONCILIATION_COUNTER,
};
use ledger_check_domain::entities::{AccountCurrency, BlockIdentifier};
use ledger_check_domain::value_objects::{ReconciliationFailure, ReconciliationKind};
use primitive_types::U256;
use rust_decimal::Decimal;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// Receives the result of every reconciliation.
#[async_trait]
pub trait ReconciliationHandler: Send + Sync {
    /// Computed and live balances matched.
    async fn reconciliation_succeeded(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
        block: &BlockIdentifier,
        value: Decimal,
    ) -> Result<(), ReconcileError>;

    /// The account currency is exempt from reconciliation.
    async fn reconciliation_exempted(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
    ) -> Result<(), ReconcileError>;

    /// No comparable live balance was available.
    async fn reconciliation_skipped(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
        reason: &str,
    ) -> Result<(), ReconcileError>;

    /// Computed and live balances disagreed. Returning an error stops the
    /// reconciler.
    async fn reconciliation_failed(
        &self,
        failure: ReconciliationFailure,
    ) -> Result<(), ReconcileError>;
}

/// Handler counting results and keeping the failures a check ended on.
pub struct FailureRecorder {
    counters: CounterStorage,
    logger: StatsLogger,
    halt_on_error: bool,
    active_failure: Mutex<Option<ReconciliationFailure>>,
    inactive_failure: Mutex<Option<ReconciliationFailure>>,
}

impl FailureRecorder {
    /// Creates a recorder. When `halt_on_error` is false failures are only
    /// counted and logged.
    pub fn new(counters: CounterStorage, logger: StatsLogger, halt_on_error: bool) -> Self {
        Self {
            counters,
            logger,
            halt_on_error,
            active_failure: Mutex::new(None),
            inactive_failure: Mutex::new(None),
        }
    }

    /// First active failure that halted the check.
    pub fn active_failure(&self) -> Option<ReconciliationFailure> {
        lock(&self.active_failure).clone()
    }

    /// First inactive failure that halted the check.
    pub fn inactive_failure(&self) -> Option<ReconciliationFailure> {
        lock(&self.inactive_failure).clone()
    }

    /// Block of the first active failure.
    pub fn active_failure_block(&self) -> Option<BlockIdentifier> {
        lock(&self.active_failure)
            .as_ref()
            .and_then(|failure| failure.causal_block().cloned())
    }

    async fn count(&self, name: &str) -> Result<(), ReconcileError> {
        self.counters.update(name, U256::one()).await?;
        Ok(())
    }
}

#[async_trait]
impl ReconciliationHandler for FailureRecorder {
    async fn reconciliation_succeeded(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
        block: &BlockIdentifier,
        value: Decimal,
    ) -> Result<(), ReconcileError> {
        self.logger
            .log_reconciliation(kind, account_currency, block.index, value);
        self.count(match kind {
            ReconciliationKind::Active => ACTIVE_RECONCILIATION_COUNTER,
            ReconciliationKind::Inactive => INACTIVE_RECONCILIATION_COUNTER,
        })
        .await
    }

    async fn reconciliation_exempted(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
    ) -> Result<(), ReconcileError> {
        debug!(kind = %kind, account = %account_currency, "Reconciliation exempt");
        self.count(EXEMPT_RECONCILIATION_COUNTER).await
    }

    async fn reconciliation_skipped(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
        reason: &str,
    ) -> Result<(), ReconcileError> {
        debug!(kind = %kind, account = %account_currency, reason, "Reconciliation skipped");
        self.count(SKIPPED_RECONCILIATION_COUNTER).await
    }

    async fn reconciliation_failed(
        &self,
        failure: ReconciliationFailure,
    ) -> Result<(), ReconcileError> {
        self.count(FAILED_RECONCILIATION_COUNTER).await?;

        if !self.halt_on_error {
            warn!(failure = %failure, "Ignoring reconciliation failure");
            return Ok(());
        }

        error!(failure = %failure, "Reconciliation failed");
        let slot = match failure.kind() {
            ReconciliationKind::Active => &self.active_failure,
            ReconciliationKind::Inactive => &self.inactive_failure,
        };
        lock(slot).get_or_insert_with(|| failure.clone());
        Err(ReconcileError::Mismatch(Box::new(failure)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LogOptions;
    use ledger_check_data::LocalStore;
    use ledger_check_domain::entities::{AccountIdentifier, Currency};
    use rust_decimal_macros::dec;

    fn alice() -> AccountCurrency {
        AccountCurrency::new(AccountIdentifier::new("alice"), Currency::new("ADA", 6))
    }

    fn active(index: i64) -> ReconciliationFailure {
        ReconciliationFailure::Active {
            account_currency: alice(),
            block: BlockIdentifier::new(index, format!("h{index}")),
            computed: dec!(1),
            live: dec!(2),
        }
    }

    fn recorder(store: &LocalStore, halt_on_error: bool) -> FailureRecorder {
        let logger = StatsLogger::new(store.counters(), LogOptions::default());
        FailureRecorder::new(store.counters(), logger, halt_on_error)
    }

    #[tokio::test]
    async fn test_halting_keeps_first_failure_of_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let recorder = recorder(&store, true);

        assert!(recorder.reconciliation_failed(active(7)).await.is_err());
        assert!(recorder.reconciliation_failed(active(9)).await.is_err());

        assert_eq!(recorder.active_failure_block().unwrap().index, 7);
        assert!(recorder.inactive_failure().is_none());
        assert_eq!(
            store
                .counters()
                .get(FAILED_RECONCILIATION_COUNTER)
                .await
                .unwrap(),
            U256::from(2)
        );
    }

    #[tokio::test]
    async fn test_ignored_failures_are_only_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let recorder = recorder(&store, false);

        recorder.reconciliation_failed(active(3)).await.unwrap();
        assert!(recorder.active_failure().is_none());
    }

    #[tokio::test]
    async fn test_results_update_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::scratch(dir.path());
        let recorder = recorder(&store, true);
        let block = BlockIdentifier::new(1, "h1");

        recorder
            .reconciliation_succeeded(ReconciliationKind::Active, &alice(), &block, dec!(5))
            .await
            .unwrap();
        recorder
            .reconciliation_succeeded(ReconciliationKind::Inactive, &alice(), &block, dec!(5))
            .await
            .unwrap();
        recorder
            .reconciliation_skipped(ReconciliationKind::Inactive, &alice(), "tip moved")
            .await
            .unwrap();

        let counters = store.counters().snapshot().await.unwrap();
        assert_eq!(counters[ACTIVE_RECONCILIATION_COUNTER], U256::one());
        assert_eq!(counters[INACTIVE_RECONCILIATION_COUNTER], U256::one());
        assert_eq!(counters[SKIPPED_RECONCILIATION_COUNTER], U256::one());
    }
}
