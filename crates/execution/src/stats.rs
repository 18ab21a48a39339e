//! Progress reporting.

use chrono::{DateTime, Utc};
use ledger_check_data::{BalanceChange, CounterStorage};
use ledger_check_domain::counters::{
    ACTIVE_RECONCILIATION_COUNTER, BLOCK_COUNTER, EXEMPT_RECONCILIATION_COUNTER,
    FAILED_RECONCILIATION_COUNTER, INACTIVE_RECONCILIATION_COUNTER, OPERATION_COUNTER,
    SEEN_ACCOUNT_COUNTER, SKIPPED_RECONCILIATION_COUNTER, TRANSACTION_COUNTER,
};
use ledger_check_domain::entities::{AccountCurrency, Block};
use ledger_check_domain::value_objects::ReconciliationKind;
use primitive_types::U256;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Which per-item streams are logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Log every ingested block.
    pub blocks: bool,
    /// Log every balance change.
    pub balance_changes: bool,
    /// Log every reconciliation.
    pub reconciliations: bool,
}

/// Logs counter snapshots and, optionally, per-item events.
#[derive(Clone)]
pub struct StatsLogger {
    counters: CounterStorage,
    options: LogOptions,
    started_at: DateTime<Utc>,
}

impl StatsLogger {
    /// Creates a logger reading `counters`.
    pub fn new(counters: CounterStorage, options: LogOptions) -> Self {
        Self {
            counters,
            options,
            started_at: Utc::now(),
        }
    }

    /// Emits every counter as one structured event.
    pub async fn log_counter_snapshot(&self) {
        let snapshot = match self.counters.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(error = %e, "Counters unavailable");
                return;
            }
        };
        let get = |name: &str| snapshot.get(name).copied().unwrap_or_else(U256::zero);

        let elapsed = (Utc::now() - self.started_at).num_seconds();
        let blocks = get(BLOCK_COUNTER);
        let rate = if elapsed > 0 {
            blocks / U256::from(elapsed)
        } else {
            blocks
        };

        info!(
            elapsed_secs = elapsed,
            blocks = %blocks,
            blocks_per_sec = %rate,
            transactions = %get(TRANSACTION_COUNTER),
            operations = %get(OPERATION_COUNTER),
            accounts = %get(SEEN_ACCOUNT_COUNTER),
            active_reconciliations = %get(ACTIVE_RECONCILIATION_COUNTER),
            inactive_reconciliations = %get(INACTIVE_RECONCILIATION_COUNTER),
            exempt_reconciliations = %get(EXEMPT_RECONCILIATION_COUNTER),
            skipped_reconciliations = %get(SKIPPED_RECONCILIATION_COUNTER),
            failed_reconciliations = %get(FAILED_RECONCILIATION_COUNTER),
            "Progress"
        );
    }

    /// Logs an ingested block.
    pub fn log_block(&self, block: &Block) {
        if self.options.blocks {
            info!(
                block = %block.identifier,
                transactions = block.transactions.len(),
                operations = block.operation_count(),
                "Block added"
            );
        }
    }

    /// Logs computed balance changes.
    pub fn log_balance_changes(&self, changes: &[BalanceChange]) {
        if !self.options.balance_changes {
            return;
        }
        for change in changes {
            info!(
                account = %change.account_currency,
                block = %change.block,
                difference = %change.difference,
                value = %change.value,
                new_account = change.new_account,
                "Balance changed"
            );
        }
    }

    /// Logs a completed reconciliation.
    pub fn log_reconciliation(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
        index: i64,
        value: Decimal,
    ) {
        if self.options.reconciliations {
            info!(
                kind = %kind,
                account = %account_currency,
                index,
                value = %value,
                "Reconciled"
            );
        }
    }

    /// Emits a snapshot every `interval` until `token` is canceled, then a
    /// final one. Never fails.
    pub async fn run_periodic(&self, token: CancellationToken, interval: Duration) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.log_counter_snapshot().await,
            }
        }

        self.log_counter_snapshot().await;
    }
}
