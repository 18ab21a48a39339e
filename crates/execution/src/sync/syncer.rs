//! Syncer feeding blocks to workers in index order.

use crate::fetcher::{FetchError, Fetcher};
use crate::reconcile::ReconcileError;
use crate::stats::StatsLogger;
use async_trait::async_trait;
use ledger_check_data::{BlockBatch, BlockStorage, StorageError};
use ledger_check_domain::counters::{BLOCK_COUNTER, OPERATION_COUNTER, TRANSACTION_COUNTER};
use ledger_check_domain::entities::{Block, BlockIdentifier};
use primitive_types::U256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors raised by a block worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A lookup against the node failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Reconciliation of the block's changes failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Errors returned by [`Syncer::sync`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Canceled from outside before the end of the range.
    #[error("sync canceled before block {next}")]
    Canceled {
        /// Next block that would have been synced.
        next: i64,
    },
    /// A block could not be fetched.
    #[error("unable to fetch block {index}: {source}")]
    Fetch {
        /// Block index.
        index: i64,
        /// Underlying error.
        source: FetchError,
    },
    /// A worker rejected a block.
    #[error("block worker failed on block {block}: {source}")]
    Worker {
        /// Block being applied.
        block: BlockIdentifier,
        /// Underlying error.
        source: WorkerError,
    },
    /// Storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A consumer of ingested blocks.
///
/// Writes are staged into a shared batch so that a block and everything it
/// changed become visible at once.
#[async_trait]
pub trait BlockWorker: Send + Sync {
    /// Stages the writes caused by `block`.
    async fn stage_block(&self, block: &Block, batch: &mut BlockBatch) -> Result<(), WorkerError>;

    /// Runs after `batch` was committed, before the next block is synced.
    async fn block_committed(&self, block: &Block, batch: &BlockBatch) -> Result<(), WorkerError>;
}

/// Configuration for the syncer.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Wait between polls for a block that is not available yet.
    pub tip_poll_interval: Duration,
    /// Retries for transient fetch errors.
    pub max_fetch_retries: u32,
    /// Base delay between retries, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            tip_poll_interval: Duration::from_secs(1),
            max_fetch_retries: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Drives registered workers over a range of blocks.
pub struct Syncer {
    fetcher: Arc<dyn Fetcher>,
    blocks: BlockStorage,
    logger: StatsLogger,
    shutdown: CancellationToken,
    workers: Vec<Arc<dyn BlockWorker>>,
    config: SyncerConfig,
}

impl Syncer {
    /// Creates a syncer. `shutdown` is canceled once the end of a requested
    /// range is reached.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        blocks: BlockStorage,
        logger: StatsLogger,
        shutdown: CancellationToken,
        workers: Vec<Arc<dyn BlockWorker>>,
        config: SyncerConfig,
    ) -> Self {
        Self {
            fetcher,
            blocks,
            logger,
            shutdown,
            workers,
            config,
        }
    }

    /// Syncs blocks `start..=end` (without an end, follows the tip until
    /// canceled).
    ///
    /// Returns `Ok(())` when the range is complete, after firing the shutdown
    /// token. Cancellation before that is reported as
    /// [`SyncError::Canceled`].
    pub async fn sync(
        &self,
        token: &CancellationToken,
        start: i64,
        end: Option<i64>,
    ) -> Result<(), SyncError> {
        info!(start, end = ?end, "Starting sync");

        let mut next = start;
        loop {
            if let Some(end) = end
                && next > end
            {
                info!(end, "Finished syncing range");
                self.shutdown.cancel();
                return Ok(());
            }

            tokio::select! {
                _ = token.cancelled() => return Err(SyncError::Canceled { next }),
                applied = self.sync_block(next) => applied?,
            }
            next += 1;
        }
    }

    async fn sync_block(&self, index: i64) -> Result<(), SyncError> {
        let block = self.fetch_block(index).await?;
        let worker_error = |source| SyncError::Worker {
            block: block.identifier.clone(),
            source,
        };

        let mut batch = BlockBatch::new(block.identifier.clone());
        batch.count(BLOCK_COUNTER, U256::one());
        batch.count(TRANSACTION_COUNTER, U256::from(block.transactions.len()));
        batch.count(OPERATION_COUNTER, U256::from(block.operation_count()));
        for worker in &self.workers {
            worker
                .stage_block(&block, &mut batch)
                .await
                .map_err(worker_error)?;
        }

        self.blocks.commit(&batch).await?;
        self.logger.log_block(&block);

        for worker in &self.workers {
            worker
                .block_committed(&block, &batch)
                .await
                .map_err(worker_error)?;
        }
        Ok(())
    }

    async fn fetch_block(&self, index: i64) -> Result<Block, SyncError> {
        let mut attempts = 0u32;
        loop {
            match self.fetcher.block(index).await {
                Ok(Some(block)) => return Ok(block),
                Ok(None) => {
                    debug!(index, "Block not available yet");
                    tokio::time::sleep(self.config.tip_poll_interval).await;
                }
                Err(FetchError::Transient(reason)) if attempts < self.config.max_fetch_retries => {
                    attempts += 1;
                    warn!(index, attempts, reason = %reason, "Retrying block fetch");
                    tokio::time::sleep(self.config.retry_backoff * attempts).await;
                }
                Err(source) => return Err(SyncError::Fetch { index, source }),
            }
        }
    }
}
