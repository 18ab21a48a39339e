//! Runs a data check and turns its end state into a verdict.

use crate::cancellation::CancellationRegistry;
use crate::config::{ConfigError, DataConfiguration, load_accounts};
use crate::fetcher::{FetchError, Fetcher, NetworkStatus};
use crate::localizer::{LocalizeError, Localizer};
use crate::outcome::{Outcome, TerminalState, classify_outcome};
use crate::pipeline::{Pipeline, PipelineError, PipelineSettings};
use ledger_check_data::{LocalStore, StorageError, StorageProvisioner, TempDirProvisioner};
use ledger_check_domain::counters::{ACTIVE_RECONCILIATION_COUNTER, INACTIVE_RECONCILIATION_COUNTER};
use ledger_check_domain::entities::{AccountCurrency, BlockIdentifier};
use ledger_check_domain::value_objects::{ReconciliationFailure, Verdict};
use primitive_types::U256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Errors that prevent a check from producing a verdict.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The node could not be queried.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Persistent storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An account or configuration file is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct RunReport {
    result: Result<(), PipelineError>,
    reconciliations: Option<U256>,
    inactive_failure: Option<ReconciliationFailure>,
}

/// Entry point of a data check.
pub struct Orchestrator {
    config: DataConfiguration,
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<CancellationRegistry>,
    provisioner: Arc<dyn StorageProvisioner>,
}

impl Orchestrator {
    /// Creates an orchestrator. Ephemeral storage goes to the configured
    /// scratch directory.
    pub fn new(
        config: DataConfiguration,
        fetcher: Arc<dyn Fetcher>,
        registry: Arc<CancellationRegistry>,
    ) -> Self {
        let provisioner = Arc::new(TempDirProvisioner::new(config.scratch_directory.clone()));
        Self {
            config,
            fetcher,
            registry,
            provisioner,
        }
    }

    /// Replaces the ephemeral storage provisioner.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Arc<dyn StorageProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Syncs and reconciles, then classifies the outcome, localizing the
    /// faulty block when an inactive failure allows it.
    ///
    /// # Errors
    /// Returns an error when the check cannot be set up or its store cannot
    /// be closed. Check failures are verdicts, not errors.
    pub async fn run(&self) -> Result<Verdict, OrchestratorError> {
        let status = self.fetcher.network_status().await?;
        let settings = self.settings()?;
        let store_dir = self
            .config
            .data_directory
            .join("data")
            .join(status.network.directory_name());
        info!(
            network = %status.network,
            genesis = %status.genesis_block,
            tip = %status.current_block,
            "Starting data check"
        );

        let store = LocalStore::open(&store_dir)
            .await?
            .with_flush_interval(self.config.store_flush_interval);
        let report = self.check(&store, &status, &settings).await;
        let closed = store.close().await;
        let report = report?;
        closed?;

        if let Err(e) = &report.result {
            error!(error = %e, "Data check stopped");
        }
        let outcome = classify_outcome(TerminalState {
            aborted: self.registry.is_aborted(),
            error: report.result.as_ref().err(),
            reconciliations: report.reconciliations,
            inactive_failure: report.inactive_failure,
            lookup_balance_by_block: self.config.lookup_balance_by_block(),
        });

        match outcome {
            Outcome::Verdict(verdict) => Ok(verdict),
            Outcome::Localize {
                account_currency,
                observed_at,
            } => Ok(self
                .localize(&status, settings, &account_currency, &observed_at)
                .await),
        }
    }

    /// Searches for missing operations of `account_currency` at or before
    /// block `observed_at`, without running a check first. Without
    /// historical balance lookup the search cannot run and the verdict is
    /// [`Verdict::DiagnosisUnavailable`].
    ///
    /// # Errors
    /// Returns an error if the node cannot be queried or the block does not
    /// exist.
    pub async fn find_missing_ops(
        &self,
        account_currency: &AccountCurrency,
        observed_at: i64,
    ) -> Result<Verdict, OrchestratorError> {
        if !self.config.lookup_balance_by_block() {
            return Ok(Verdict::DiagnosisUnavailable {
                reason: format!(
                    "balance of {account_currency} was wrong at block {observed_at}"
                ),
            });
        }

        let status = self.fetcher.network_status().await?;
        let settings = self.settings()?;
        let block = self
            .fetcher
            .block(observed_at)
            .await?
            .ok_or_else(|| FetchError::NotFound(format!("block {observed_at}")))?;

        Ok(self
            .localize(&status, settings, account_currency, &block.identifier)
            .await)
    }

    fn settings(&self) -> Result<PipelineSettings, OrchestratorError> {
        let interesting = load_accounts(self.config.interesting_accounts.as_deref())?;
        let exempt = load_accounts(self.config.exempt_accounts.as_deref())?;
        Ok(PipelineSettings::from_config(&self.config, interesting, exempt))
    }

    async fn check(
        &self,
        store: &LocalStore,
        status: &NetworkStatus,
        settings: &PipelineSettings,
    ) -> Result<RunReport, OrchestratorError> {
        if let Some(manifest) = &self.config.bootstrap_balances {
            store
                .balances()
                .bootstrap_balances(manifest, &status.genesis_block)
                .await?;
        }

        let start = match store.blocks().head_block().await? {
            Some(head) => {
                info!(head = %head, "Resuming from stored head");
                head.index + 1
            }
            None => self
                .config
                .start_index
                .unwrap_or(status.genesis_block.index),
        };

        let token = self.registry.fresh_token();
        let pipeline = Pipeline::assemble(settings, self.fetcher.clone(), store, token);
        let (result, ()) = tokio::join!(
            pipeline.run(start, self.config.end_index),
            pipeline.start_periodic_logger(self.config.periodic_logging_frequency())
        );

        Ok(RunReport {
            result,
            reconciliations: reconciliation_count(store).await,
            inactive_failure: pipeline.recorder().inactive_failure(),
        })
    }

    async fn localize(
        &self,
        status: &NetworkStatus,
        settings: PipelineSettings,
        account_currency: &AccountCurrency,
        observed_at: &BlockIdentifier,
    ) -> Verdict {
        let localizer = Localizer::new(
            self.fetcher.clone(),
            self.registry.clone(),
            self.provisioner.clone(),
            settings,
            status.genesis_block.index,
            self.config.inactive_failure_lookback_window,
        );

        match localizer.find_missing_ops(account_currency, observed_at).await {
            Ok(block) => Verdict::Diagnosed {
                account_currency: account_currency.clone(),
                block,
            },
            Err(LocalizeError::Halted) => Verdict::Halted,
            Err(e @ LocalizeError::Exhausted { .. }) => Verdict::LocalizationExhausted {
                reason: e.to_string(),
            },
            Err(e) => Verdict::Failed {
                reason: e.to_string(),
            },
        }
    }
}

async fn reconciliation_count(store: &LocalStore) -> Option<U256> {
    let counters = store.counters();
    let active = counters.get(ACTIVE_RECONCILIATION_COUNTER).await.ok()?;
    let inactive = counters.get(INACTIVE_RECONCILIATION_COUNTER).await.ok()?;
    Some(active.saturating_add(inactive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingProvisioner, alice, chain};
    use ledger_check_data::BootstrapBalance;
    use ledger_check_domain::counters::BLOCK_COUNTER;
    use rust_decimal_macros::dec;
    use std::path::Path;
    use std::time::Duration;

    fn config(data_directory: &Path) -> DataConfiguration {
        DataConfiguration {
            data_directory: data_directory.to_path_buf(),
            inactive_reconciliation_concurrency: 0,
            inactive_reconciliation_sleep_ms: 5,
            tip_poll_interval_ms: 5,
            inactive_failure_lookback_window: 10,
            ..Default::default()
        }
    }

    async fn verdict(orchestrator: &Orchestrator) -> Verdict {
        tokio::time::timeout(Duration::from_secs(30), orchestrator.run())
            .await
            .expect("check timed out")
            .unwrap()
    }

    #[tokio::test]
    async fn test_clean_history_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfiguration {
            end_index: Some(30),
            ..config(dir.path())
        };
        let orchestrator = Orchestrator::new(
            config,
            chain(30, None),
            Arc::new(CancellationRegistry::new()),
        );
        assert_eq!(verdict(&orchestrator).await, Verdict::Passed);
    }

    #[tokio::test]
    async fn test_no_reconciliations_pass_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfiguration {
            end_index: Some(10),
            reconciliation_disabled: true,
            ..config(dir.path())
        };
        let orchestrator = Orchestrator::new(
            config,
            chain(10, Some(4)),
            Arc::new(CancellationRegistry::new()),
        );
        assert_eq!(verdict(&orchestrator).await, Verdict::PassedWithWarning);
    }

    #[tokio::test]
    async fn test_active_failure_fails_without_search() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfiguration {
            end_index: Some(30),
            ..config(dir.path())
        };
        let provisioner = Arc::new(CountingProvisioner::default());
        let orchestrator = Orchestrator::new(
            config,
            chain(30, Some(7)),
            Arc::new(CancellationRegistry::new()),
        )
        .with_provisioner(provisioner.clone());

        assert!(matches!(
            verdict(&orchestrator).await,
            Verdict::Failed { .. }
        ));
        assert_eq!(provisioner.provisioned(), 0);
    }

    #[tokio::test]
    async fn test_inactive_failure_is_localized() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfiguration {
            active_reconciliation_concurrency: 0,
            inactive_reconciliation_concurrency: 1,
            inactive_reconciliation_frequency: 0,
            ..config(dir.path())
        };
        let provisioner = Arc::new(CountingProvisioner::default());
        let orchestrator = Orchestrator::new(
            config,
            chain(40, Some(17)),
            Arc::new(CancellationRegistry::new()),
        )
        .with_provisioner(provisioner.clone());

        match verdict(&orchestrator).await {
            Verdict::Diagnosed {
                account_currency,
                block,
            } => {
                assert_eq!(account_currency, alice());
                assert_eq!(block.index, 17);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(provisioner.peak(), 1);
        assert_eq!(provisioner.open(), 0);
    }

    #[tokio::test]
    async fn test_inactive_failure_without_lookup_is_not_localized() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfiguration {
            active_reconciliation_concurrency: 0,
            inactive_reconciliation_concurrency: 1,
            inactive_reconciliation_frequency: 0,
            historical_balance_disabled: true,
            ..config(dir.path())
        };
        let provisioner = Arc::new(CountingProvisioner::default());
        let orchestrator = Orchestrator::new(
            config,
            chain(20, Some(3)),
            Arc::new(CancellationRegistry::new()),
        )
        .with_provisioner(provisioner.clone());

        assert!(matches!(
            verdict(&orchestrator).await,
            Verdict::DiagnosisUnavailable { .. }
        ));
        assert_eq!(provisioner.provisioned(), 0);
    }

    #[tokio::test]
    async fn test_abort_halts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(CancellationRegistry::new());
        registry.abort_all();
        let orchestrator = Orchestrator::new(config(dir.path()), chain(20, Some(3)), registry);

        assert_eq!(verdict(&orchestrator).await, Verdict::Halted);
    }

    #[tokio::test]
    async fn test_resumes_from_stored_head() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = chain(20, None);
        for end in [5, 12] {
            let config = DataConfiguration {
                end_index: Some(end),
                ..config(dir.path())
            };
            let orchestrator = Orchestrator::new(
                config,
                fetcher.clone(),
                Arc::new(CancellationRegistry::new()),
            );
            assert_eq!(verdict(&orchestrator).await, Verdict::Passed);
        }

        let store = LocalStore::open(dir.path().join("data").join("bitcoin-regtest"))
            .await
            .unwrap();
        assert_eq!(store.blocks().head_block().await.unwrap().unwrap().index, 12);
        assert_eq!(
            store.counters().get(BLOCK_COUNTER).await.unwrap(),
            U256::from(13)
        );
    }

    #[tokio::test]
    async fn test_bootstrap_after_sync_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = chain(10, None);
        let first = DataConfiguration {
            end_index: Some(3),
            ..config(dir.path())
        };
        let verdict = Orchestrator::new(first, fetcher.clone(), Arc::default())
            .run()
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Passed);

        let manifest = dir.path().join("bootstrap.json");
        let entries = vec![BootstrapBalance {
            account_currency: alice(),
            value: dec!(1),
        }];
        std::fs::write(&manifest, serde_json::to_vec(&entries).unwrap()).unwrap();

        let second = DataConfiguration {
            end_index: Some(6),
            bootstrap_balances: Some(manifest),
            ..config(dir.path())
        };
        let err = Orchestrator::new(second, fetcher, Arc::default())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Storage(StorageError::AlreadySyncing { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_missing_ops_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            config(dir.path()),
            chain(50, Some(31)),
            Arc::new(CancellationRegistry::new()),
        )
        .with_provisioner(Arc::new(CountingProvisioner::default()));

        let verdict = orchestrator.find_missing_ops(&alice(), 50).await.unwrap();
        assert!(matches!(verdict, Verdict::Diagnosed { block, .. } if block.index == 31));
    }

    #[tokio::test]
    async fn test_find_missing_ops_requires_historical_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataConfiguration {
            historical_balance_disabled: true,
            ..config(dir.path())
        };
        let provisioner = Arc::new(CountingProvisioner::default());
        let orchestrator = Orchestrator::new(
            config,
            chain(50, Some(31)),
            Arc::new(CancellationRegistry::new()),
        )
        .with_provisioner(provisioner.clone());

        let verdict = orchestrator.find_missing_ops(&alice(), 50).await.unwrap();
        assert!(matches!(verdict, Verdict::DiagnosisUnavailable { .. }));
        assert_eq!(provisioner.provisioned(), 0);
    }
}
