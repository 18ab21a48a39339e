//! Check configuration.

use ledger_check_data::repositories::DEFAULT_FLUSH_INTERVAL;
use ledger_check_domain::entities::AccountCurrency;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default size of each localization window, in blocks.
pub const INACTIVE_FAILURE_LOOKBACK_WINDOW: i64 = 250;

/// Default interval between counter snapshots.
pub const PERIODIC_LOGGING_FREQUENCY: Duration = Duration::from_secs(10);

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("unable to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File could not be parsed.
    #[error("unable to parse {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Data check settings.
    pub data: DataConfiguration,
}

impl Configuration {
    /// Loads a configuration file, falling back to defaults for missing
    /// fields.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_json(path.as_ref())?;
        config.data.validate()?;
        Ok(config)
    }
}

/// Settings of a data check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfiguration {
    /// Root directory for persistent storage.
    pub data_directory: PathBuf,
    /// Commits between two writes of the persistent store to disk.
    pub store_flush_interval: usize,
    /// Parent directory for ephemeral storage (system temp dir if unset).
    pub scratch_directory: Option<PathBuf>,
    /// First block to sync when nothing was synced yet.
    pub start_index: Option<i64>,
    /// Last block to sync (follow the tip forever if unset).
    pub end_index: Option<i64>,
    /// Maximum concurrent active reconciliations (0 disables them).
    pub active_reconciliation_concurrency: usize,
    /// Number of inactive reconciliation workers (0 disables them).
    pub inactive_reconciliation_concurrency: usize,
    /// Blocks between inactive checks of the same account.
    pub inactive_reconciliation_frequency: i64,
    /// Sleep between inactive sweeps in milliseconds.
    pub inactive_reconciliation_sleep_ms: u64,
    /// Disables balance lookups by block.
    pub historical_balance_disabled: bool,
    /// Keep going when a reconciliation fails.
    pub ignore_reconciliation_error: bool,
    /// Only sync, never reconcile.
    pub reconciliation_disabled: bool,
    /// File listing account currencies never reconciled.
    pub exempt_accounts: Option<PathBuf>,
    /// File listing account currencies always reconciled.
    pub interesting_accounts: Option<PathBuf>,
    /// Balance manifest applied before the first sync.
    pub bootstrap_balances: Option<PathBuf>,
    /// Size of each localization window in blocks.
    pub inactive_failure_lookback_window: i64,
    /// Interval between counter snapshots in seconds.
    pub periodic_logging_frequency_secs: u64,
    /// Poll interval while waiting for new blocks in milliseconds.
    pub tip_poll_interval_ms: u64,
    /// Retries for transient fetch errors.
    pub max_fetch_retries: u32,
    /// Log every ingested block.
    pub log_blocks: bool,
    /// Log every balance change.
    pub log_balance_changes: bool,
    /// Log every reconciliation.
    pub log_reconciliations: bool,
}

impl Default for DataConfiguration {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("ledger-check-data"),
            store_flush_interval: DEFAULT_FLUSH_INTERVAL,
            scratch_directory: None,
            start_index: None,
            end_index: None,
            active_reconciliation_concurrency: 8,
            inactive_reconciliation_concurrency: 4,
            inactive_reconciliation_frequency: 250,
            inactive_reconciliation_sleep_ms: 1_000,
            historical_balance_disabled: false,
            ignore_reconciliation_error: false,
            reconciliation_disabled: false,
            exempt_accounts: None,
            interesting_accounts: None,
            bootstrap_balances: None,
            inactive_failure_lookback_window: INACTIVE_FAILURE_LOOKBACK_WINDOW,
            periodic_logging_frequency_secs: PERIODIC_LOGGING_FREQUENCY.as_secs(),
            tip_poll_interval_ms: 1_000,
            max_fetch_retries: 5,
            log_blocks: false,
            log_balance_changes: false,
            log_reconciliations: false,
        }
    }
}

impl DataConfiguration {
    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inactive_failure_lookback_window <= 0 {
            return Err(ConfigError::Invalid(
                "inactive_failure_lookback_window must be positive".into(),
            ));
        }
        if self.inactive_reconciliation_frequency < 0 {
            return Err(ConfigError::Invalid(
                "inactive_reconciliation_frequency must not be negative".into(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_index, self.end_index)
            && start > end
        {
            return Err(ConfigError::Invalid(format!(
                "start_index {start} is after end_index {end}"
            )));
        }
        Ok(())
    }

    /// Whether balances can be looked up at a given block.
    #[must_use]
    pub fn lookup_balance_by_block(&self) -> bool {
        !self.historical_balance_disabled
    }

    /// Interval between counter snapshots.
    #[must_use]
    pub fn periodic_logging_frequency(&self) -> Duration {
        Duration::from_secs(self.periodic_logging_frequency_secs.max(1))
    }

    /// Sleep between inactive sweeps.
    #[must_use]
    pub fn inactive_reconciliation_sleep(&self) -> Duration {
        Duration::from_millis(self.inactive_reconciliation_sleep_ms)
    }

    /// Poll interval while waiting for new blocks.
    #[must_use]
    pub fn tip_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tip_poll_interval_ms)
    }
}

/// Parses the account currencies listed in `path`. No path means no
/// accounts.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_accounts(path: Option<&Path>) -> Result<Vec<AccountCurrency>, ConfigError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    let accounts: Vec<AccountCurrency> = load_json(path)?;
    info!(
        count = accounts.len(),
        path = %path.display(),
        "Loaded accounts"
    );
    Ok(accounts)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"data": {"historical_balance_disabled": true, "end_index": 40}}"#,
        )
        .unwrap();

        let config = Configuration::load(&path).unwrap();
        assert!(!config.data.lookup_balance_by_block());
        assert_eq!(config.data.end_index, Some(40));
        assert_eq!(
            config.data.inactive_failure_lookback_window,
            INACTIVE_FAILURE_LOOKBACK_WINDOW
        );
        assert_eq!(config.data.active_reconciliation_concurrency, 8);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = DataConfiguration {
            start_index: Some(10),
            end_index: Some(2),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_accounts() {
        assert!(load_accounts(None).unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(
            &path,
            r#"[{"account": {"address": "alice"}, "currency": {"symbol": "BTC", "decimals": 8}}]"#,
        )
        .unwrap();

        let accounts = load_accounts(Some(&path)).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].account.address, "alice");
    }
}
