//! Compares computed balances with the balances reported by the node.

use super::ReconciliationHandler;
use crate::fetcher::{FetchError, Fetcher};
use crate::sync::BalanceUpdateObserver;
use async_trait::async_trait;
use ledger_check_data::{BalanceChange, BalanceStorage, BlockStorage, StorageError};
use ledger_check_domain::entities::{AccountCurrency, Block, BlockIdentifier};
use ledger_check_domain::value_objects::{ReconciliationFailure, ReconciliationKind};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors returned by the reconciler.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Computed and live balances disagree.
    #[error("{0}")]
    Mismatch(Box<ReconciliationFailure>),
    /// A live balance could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A reconciliation task panicked or was aborted.
    #[error("reconciliation task failed: {0}")]
    Task(String),
}

/// Reconciliation status for an account currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    /// Never checked.
    Pending,
    /// Claimed by an inactive worker.
    Checking,
    /// Last check matched or was not comparable.
    InSync,
    /// Last check failed.
    Failed,
}

/// State for a tracked account currency.
#[derive(Debug, Clone)]
pub struct AccountState {
    /// Head index at the last check.
    pub last_checked: Option<i64>,
    /// Reconciliation status.
    pub status: ReconcileStatus,
}

impl AccountState {
    fn is_due(&self, head: i64, frequency: i64) -> bool {
        if self.status == ReconcileStatus::Checking {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(last) => head - last >= frequency.max(1),
        }
    }
}

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Maximum concurrent active reconciliations (0 disables them).
    pub active_concurrency: usize,
    /// Number of inactive workers (0 disables them).
    pub inactive_concurrency: usize,
    /// Account currencies reconciled even before they are seen.
    pub interesting_accounts: Vec<AccountCurrency>,
    /// Account currencies never reconciled.
    pub exempt_accounts: HashSet<AccountCurrency>,
    /// Compare at the exact block instead of at the tip.
    pub lookup_balance_by_block: bool,
    /// Blocks between inactive checks of the same account currency.
    pub inactive_frequency: i64,
    /// Sleep when no account currency is due.
    pub inactive_sleep: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            active_concurrency: 8,
            inactive_concurrency: 4,
            interesting_accounts: Vec::new(),
            exempt_accounts: HashSet::new(),
            lookup_balance_by_block: true,
            inactive_frequency: 250,
            inactive_sleep: Duration::from_secs(1),
        }
    }
}

/// Reconciler running active checks per block and inactive sweeps.
#[derive(Clone)]
pub struct Reconciler {
    fetcher: Arc<dyn Fetcher>,
    balances: BalanceStorage,
    blocks: BlockStorage,
    handler: Arc<dyn ReconciliationHandler>,
    config: Arc<ReconcilerConfig>,
    accounts: Arc<RwLock<HashMap<AccountCurrency, AccountState>>>,
    active_permits: Arc<Semaphore>,
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        balances: BalanceStorage,
        blocks: BlockStorage,
        handler: Arc<dyn ReconciliationHandler>,
        config: ReconcilerConfig,
    ) -> Self {
        let permits = config.active_concurrency.max(1);
        Self {
            fetcher,
            balances,
            blocks,
            handler,
            config: Arc::new(config),
            accounts: Arc::new(RwLock::new(HashMap::new())),
            active_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Runs inactive sweeps until `token` is canceled or a check fails.
    pub async fn reconcile(&self, token: CancellationToken) -> Result<(), ReconcileError> {
        let mut seen = self.balances.all_account_currencies().await?;
        seen.extend(self.config.interesting_accounts.iter().cloned());
        self.track(seen).await;

        if self.config.inactive_concurrency == 0 {
            debug!("Inactive reconciliation disabled");
            token.cancelled().await;
            return Ok(());
        }

        info!(
            workers = self.config.inactive_concurrency,
            frequency = self.config.inactive_frequency,
            "Starting inactive reconciliation"
        );
        let mut workers = JoinSet::new();
        for _ in 0..self.config.inactive_concurrency {
            let reconciler = self.clone();
            let token = token.clone();
            workers.spawn(async move { reconciler.inactive_worker(token).await });
        }

        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| ReconcileError::Task(e.to_string()))??;
        }
        Ok(())
    }

    /// Number of tracked account currencies.
    pub async fn tracked_count(&self) -> usize {
        self.accounts.read().await.len()
    }

    async fn track(&self, accounts: impl IntoIterator<Item = AccountCurrency>) {
        let mut tracked = self.accounts.write().await;
        for account_currency in accounts {
            tracked.entry(account_currency).or_insert(AccountState {
                last_checked: None,
                status: ReconcileStatus::Pending,
            });
        }
    }

    async fn finish(&self, account_currency: &AccountCurrency, index: i64, status: ReconcileStatus) {
        if let Some(state) = self.accounts.write().await.get_mut(account_currency) {
            state.last_checked = Some(state.last_checked.map_or(index, |last| last.max(index)));
            state.status = status;
        }
    }

    async fn inactive_worker(&self, token: CancellationToken) -> Result<(), ReconcileError> {
        while !token.is_cancelled() {
            match self.claim_due().await? {
                Some((account_currency, head)) => {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        checked = self.reconcile_inactive(&account_currency, head) => checked?,
                    }
                }
                None => {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.config.inactive_sleep) => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn claim_due(&self) -> Result<Option<(AccountCurrency, i64)>, ReconcileError> {
        let Some(head) = self.blocks.head_block().await? else {
            return Ok(None);
        };

        let mut accounts = self.accounts.write().await;
        let due = accounts
            .iter_mut()
            .filter(|(_, state)| state.is_due(head.index, self.config.inactive_frequency))
            .min_by_key(|(_, state)| state.last_checked);
        Ok(due.map(|(account_currency, state)| {
            state.status = ReconcileStatus::Checking;
            (account_currency.clone(), head.index)
        }))
    }

    async fn reconcile_inactive(
        &self,
        account_currency: &AccountCurrency,
        claimed_at: i64,
    ) -> Result<(), ReconcileError> {
        let kind = ReconciliationKind::Inactive;
        if self.config.exempt_accounts.contains(account_currency) {
            self.finish(account_currency, claimed_at, ReconcileStatus::InSync)
                .await;
            return self
                .handler
                .reconciliation_exempted(kind, account_currency)
                .await;
        }

        let Some((record, head)) = self.balances.snapshot(account_currency).await? else {
            self.finish(account_currency, claimed_at, ReconcileStatus::Pending)
                .await;
            return Ok(());
        };

        let Some(live) = self.live_balance(kind, account_currency, &head).await? else {
            self.finish(account_currency, head.index, ReconcileStatus::InSync)
                .await;
            return Ok(());
        };

        if record.value == live {
            self.finish(account_currency, head.index, ReconcileStatus::InSync)
                .await;
            return self
                .handler
                .reconciliation_succeeded(kind, account_currency, &head, live)
                .await;
        }

        self.finish(account_currency, head.index, ReconcileStatus::Failed)
            .await;
        self.handler
            .reconciliation_failed(ReconciliationFailure::Inactive {
                account_currency: account_currency.clone(),
                observed_at: head,
                computed: record.value,
                live,
            })
            .await
    }

    async fn reconcile_active(&self, change: BalanceChange) -> Result<(), ReconcileError> {
        let kind = ReconciliationKind::Active;
        let account_currency = &change.account_currency;
        if self.config.exempt_accounts.contains(account_currency) {
            return self
                .handler
                .reconciliation_exempted(kind, account_currency)
                .await;
        }

        let Some(live) = self.live_balance(kind, account_currency, &change.block).await? else {
            return Ok(());
        };

        if change.value == live {
            self.finish(account_currency, change.block.index, ReconcileStatus::InSync)
                .await;
            return self
                .handler
                .reconciliation_succeeded(kind, account_currency, &change.block, live)
                .await;
        }

        self.finish(account_currency, change.block.index, ReconcileStatus::Failed)
            .await;
        self.handler
            .reconciliation_failed(ReconciliationFailure::Active {
                account_currency: account_currency.clone(),
                block: change.block.clone(),
                computed: change.value,
                live,
            })
            .await
    }

    /// Live balance comparable with a computed balance at `block`. `None`
    /// (after reporting a skip) when only the tip can be queried and it has
    /// moved past `block`.
    async fn live_balance(
        &self,
        kind: ReconciliationKind,
        account_currency: &AccountCurrency,
        block: &BlockIdentifier,
    ) -> Result<Option<Decimal>, ReconcileError> {
        let at = self.config.lookup_balance_by_block.then_some(block);
        let (live_block, live) = self.fetcher.balance(account_currency, at).await?;
        if live_block != *block {
            self.handler
                .reconciliation_skipped(
                    kind,
                    account_currency,
                    &format!("live balance at {live_block}, computed at {block}"),
                )
                .await?;
            return Ok(None);
        }
        Ok(Some(live))
    }
}

#[async_trait]
impl BalanceUpdateObserver for Reconciler {
    async fn balances_changed(
        &self,
        _block: &Block,
        changes: Vec<BalanceChange>,
    ) -> Result<(), ReconcileError> {
        self.track(changes.iter().map(|change| change.account_currency.clone()))
            .await;
        if self.config.active_concurrency == 0 || changes.is_empty() {
            return Ok(());
        }

        let mut checks = JoinSet::new();
        for change in changes {
            let permit = self
                .active_permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ReconcileError::Task(e.to_string()))?;
            let reconciler = self.clone();
            checks.spawn(async move {
                let _permit = permit;
                reconciler.reconcile_active(change).await
            });
        }

        while let Some(joined) = checks.join_next().await {
            joined.map_err(|e| ReconcileError::Task(e.to_string()))??;
        }
        Ok(())
    }
}
