//! One ingestion + reconciliation pipeline over a single store.

use crate::config::DataConfiguration;
use crate::fetcher::Fetcher;
use crate::reconcile::{FailureRecorder, ReconcileError, Reconciler, ReconcilerConfig};
use crate::stats::{LogOptions, StatsLogger};
use crate::sync::{BalanceWorker, BlockWorker, SyncError, Syncer, SyncerConfig};
use ledger_check_data::LocalStore;
use ledger_check_domain::entities::AccountCurrency;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Block ingestion failed, including active reconciliation failures.
    #[error("syncer failed: {0}")]
    Sync(#[from] SyncError),
    /// Inactive reconciliation failed.
    #[error("reconciler failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Everything needed to assemble a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Syncer settings.
    pub syncer: SyncerConfig,
    /// Reconciler settings.
    pub reconciler: ReconcilerConfig,
    /// Whether reconciliation runs at all.
    pub reconciliation_enabled: bool,
    /// Only reconcile changes of this account currency.
    pub restrict_to: Option<AccountCurrency>,
    /// Stop on the first reconciliation failure.
    pub halt_on_error: bool,
    /// Per-item log streams.
    pub log_options: LogOptions,
}

impl PipelineSettings {
    /// Settings of a regular check.
    pub fn from_config(
        config: &DataConfiguration,
        interesting_accounts: Vec<AccountCurrency>,
        exempt_accounts: Vec<AccountCurrency>,
    ) -> Self {
        Self {
            syncer: SyncerConfig {
                tip_poll_interval: config.tip_poll_interval(),
                max_fetch_retries: config.max_fetch_retries,
                ..SyncerConfig::default()
            },
            reconciler: ReconcilerConfig {
                active_concurrency: config.active_reconciliation_concurrency,
                inactive_concurrency: config.inactive_reconciliation_concurrency,
                interesting_accounts,
                exempt_accounts: exempt_accounts.into_iter().collect(),
                lookup_balance_by_block: config.lookup_balance_by_block(),
                inactive_frequency: config.inactive_reconciliation_frequency,
                inactive_sleep: config.inactive_reconciliation_sleep(),
            },
            reconciliation_enabled: !config.reconciliation_disabled,
            restrict_to: None,
            halt_on_error: !config.ignore_reconciliation_error,
            log_options: LogOptions {
                blocks: config.log_blocks,
                balance_changes: config.log_balance_changes,
                reconciliations: config.log_reconciliations,
            },
        }
    }

    /// Settings of a localization run for `account_currency`: one active
    /// check at a time, no inactive sweeps, halt on the first failure.
    /// Balance lookup mode and syncer settings are kept.
    #[must_use]
    pub fn strict(&self, account_currency: &AccountCurrency) -> Self {
        Self {
            syncer: self.syncer.clone(),
            reconciler: ReconcilerConfig {
                active_concurrency: 1,
                inactive_concurrency: 0,
                interesting_accounts: vec![account_currency.clone()],
                exempt_accounts: HashSet::new(),
                lookup_balance_by_block: self.reconciler.lookup_balance_by_block,
                inactive_frequency: self.reconciler.inactive_frequency,
                inactive_sleep: self.reconciler.inactive_sleep,
            },
            reconciliation_enabled: true,
            restrict_to: Some(account_currency.clone()),
            halt_on_error: true,
            log_options: LogOptions::default(),
        }
    }
}

/// Syncer, reconciler and logger sharing one store and one token.
pub struct Pipeline {
    syncer: Syncer,
    reconciler: Reconciler,
    recorder: Arc<FailureRecorder>,
    logger: StatsLogger,
    reconciliation_enabled: bool,
    token: CancellationToken,
}

impl Pipeline {
    /// Wires a pipeline over `store`. Reaching the end of a synced range
    /// cancels `token`.
    pub fn assemble(
        settings: &PipelineSettings,
        fetcher: Arc<dyn Fetcher>,
        store: &LocalStore,
        token: CancellationToken,
    ) -> Self {
        let logger = StatsLogger::new(store.counters(), settings.log_options);
        let recorder = Arc::new(FailureRecorder::new(
            store.counters(),
            logger.clone(),
            settings.halt_on_error,
        ));
        let reconciler = Reconciler::new(
            fetcher.clone(),
            store.balances(),
            store.blocks(),
            recorder.clone(),
            settings.reconciler.clone(),
        );

        let mut worker = BalanceWorker::new(
            fetcher.clone(),
            store.balances(),
            settings.reconciler.lookup_balance_by_block,
            logger.clone(),
        );
        if settings.reconciliation_enabled {
            worker = worker.with_observer(Arc::new(reconciler.clone()));
        }
        if let Some(account_currency) = &settings.restrict_to {
            worker = worker.restrict_to(account_currency.clone());
        }
        let workers: Vec<Arc<dyn BlockWorker>> = vec![Arc::new(worker)];

        let syncer = Syncer::new(
            fetcher,
            store.blocks(),
            logger.clone(),
            token.clone(),
            workers,
            settings.syncer.clone(),
        );

        Self {
            syncer,
            reconciler,
            recorder,
            logger,
            reconciliation_enabled: settings.reconciliation_enabled,
            token,
        }
    }

    /// Syncs `start..=end`.
    pub async fn start_syncing(&self, start: i64, end: Option<i64>) -> Result<(), PipelineError> {
        self.syncer.sync(&self.token, start, end).await?;
        Ok(())
    }

    /// Runs inactive reconciliation until the token is canceled. Returns
    /// immediately on cancellation when reconciliation is disabled.
    pub async fn start_reconciler(&self) -> Result<(), PipelineError> {
        if !self.reconciliation_enabled {
            self.token.cancelled().await;
            return Ok(());
        }
        self.reconciler.reconcile(self.token.clone()).await?;
        Ok(())
    }

    /// Logs counter snapshots every `interval` until the token is canceled.
    pub async fn start_periodic_logger(&self, interval: Duration) {
        self.logger.run_periodic(self.token.clone(), interval).await;
    }

    /// Syncs and reconciles jointly. The first failure cancels the other
    /// task, and the token is always canceled on return.
    pub async fn run(&self, start: i64, end: Option<i64>) -> Result<(), PipelineError> {
        info!(start, end = ?end, "Running pipeline");
        let result = tokio::try_join!(self.start_syncing(start, end), self.start_reconciler());
        self.token.cancel();
        result.map(|_| ())
    }

    /// Recorder holding the failures the run ended on.
    pub fn recorder(&self) -> &FailureRecorder {
        &self.recorder
    }
}
