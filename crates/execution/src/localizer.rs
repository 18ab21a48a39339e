//! Search for the block that dropped balance-changing operations.
//!
//! An inactive reconciliation failure only tells which account drifted and
//! a head at which the drift was visible. The localizer replays shrinking
//! windows of history before that head with a strict pipeline (one active
//! check at a time, halting on the first mismatch) until an active failure
//! names the block, or genesis is reached.
//!
//! Every window runs against its own ephemeral storage, which is torn down
//! before the next window starts, and under a fresh cancellation token: the
//! syncer cancels its token at the end of each window.

use crate::cancellation::CancellationRegistry;
use crate::fetcher::Fetcher;
use crate::pipeline::{Pipeline, PipelineError, PipelineSettings};
use ledger_check_data::{StorageError, StorageProvisioner};
use ledger_check_domain::entities::{AccountCurrency, BlockIdentifier};
use ledger_check_domain::value_objects::SearchWindow;
use ledger_check_domain::DomainError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Reasons a search ended without naming a block.
#[derive(Debug, Error)]
pub enum LocalizeError {
    /// An abort was requested.
    #[error("search halted")]
    Halted,
    /// Every window back to genesis completed cleanly.
    #[error("exhausted search space before locating a missing-operations block (last window {searched})")]
    Exhausted {
        /// Last window searched.
        searched: SearchWindow,
    },
    /// A window failed without an active reconciliation failure.
    #[error("unable to find block with missing operations in window {window}: {source}")]
    NotFound {
        /// Window being searched.
        window: SearchWindow,
        /// Error the window ended with.
        source: PipelineError,
    },
    /// No window can be built from the failure.
    #[error(transparent)]
    Window(#[from] DomainError),
    /// Ephemeral storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

enum WindowResult {
    Clean,
    Found(BlockIdentifier),
}

/// Windowed search for missing operations.
pub struct Localizer {
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<CancellationRegistry>,
    provisioner: Arc<dyn StorageProvisioner>,
    settings: PipelineSettings,
    genesis_index: i64,
    step: i64,
}

impl Localizer {
    /// Creates a localizer. `settings` are the settings of the check that
    /// failed, from which the strict settings are derived.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        registry: Arc<CancellationRegistry>,
        provisioner: Arc<dyn StorageProvisioner>,
        settings: PipelineSettings,
        genesis_index: i64,
        step: i64,
    ) -> Self {
        Self {
            fetcher,
            registry,
            provisioner,
            settings,
            genesis_index,
            step,
        }
    }

    /// Finds the first block at or before `observed_at` whose operations do
    /// not explain the balance of `account_currency`.
    ///
    /// # Errors
    /// Returns [`LocalizeError::Halted`] on abort, [`LocalizeError::Exhausted`]
    /// when genesis is reached, and [`LocalizeError::NotFound`] when a window
    /// fails for another reason.
    pub async fn find_missing_ops(
        &self,
        account_currency: &AccountCurrency,
        observed_at: &BlockIdentifier,
    ) -> Result<BlockIdentifier, LocalizeError> {
        let strict = self.settings.strict(account_currency);
        let mut window = SearchWindow::initial(observed_at.index, self.step, self.genesis_index)?;
        info!(
            account = %account_currency,
            observed_at = %observed_at,
            step = self.step,
            "Searching for block with missing operations"
        );

        loop {
            match self.search_window(&strict, window).await? {
                WindowResult::Found(block) => {
                    info!(account = %account_currency, block = %block, "Found block with missing operations");
                    return Ok(block);
                }
                WindowResult::Clean => {
                    info!(window = %window, "No missing operations in window");
                    window = window
                        .preceding(self.step, self.genesis_index)
                        .ok_or(LocalizeError::Exhausted { searched: window })?;
                }
            }
        }
    }

    async fn search_window(
        &self,
        strict: &PipelineSettings,
        window: SearchWindow,
    ) -> Result<WindowResult, LocalizeError> {
        if self.registry.is_aborted() {
            return Err(LocalizeError::Halted);
        }

        let token = self.registry.fresh_token();
        let storage = self.provisioner.provision().await?;
        info!(window = %window, store = %storage.store().id(), "Searching window");

        let (result, active_block) = {
            let pipeline =
                Pipeline::assemble(strict, self.fetcher.clone(), storage.store(), token);
            let result = pipeline
                .run(window.start_index, Some(window.end_index))
                .await;
            (result, pipeline.recorder().active_failure_block())
        };
        storage.close().await?;

        if self.registry.is_aborted() {
            warn!(window = %window, "Search aborted");
            return Err(LocalizeError::Halted);
        }

        match (result, active_block) {
            (Ok(()), _) => Ok(WindowResult::Clean),
            (Err(_), Some(block)) => Ok(WindowResult::Found(block)),
            (Err(source), None) => Err(LocalizeError::NotFound { window, source }),
        }
    }
}
