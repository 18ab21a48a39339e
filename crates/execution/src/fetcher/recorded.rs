//! Fetcher serving a recorded chain.

use super::{FetchError, Fetcher, NetworkStatus};
use async_trait::async_trait;
use ledger_check_domain::entities::{
    AccountCurrency, Block, BlockIdentifier, NetworkIdentifier, Operation,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

/// Balance reported by the node from `index` onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Account currency.
    pub account_currency: AccountCurrency,
    /// First block the balance applies to.
    pub index: i64,
    /// Reported balance.
    pub value: Decimal,
}

/// A recorded chain: the blocks a node reports plus the balances it reports.
///
/// When the blocks omit an operation, the balances keep the effect of it,
/// which is exactly the inconsistency the checker looks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFixture {
    /// Network the chain belongs to.
    pub network: NetworkIdentifier,
    /// Reported blocks, in index order.
    pub blocks: Vec<Block>,
    /// Sparse node balances.
    #[serde(default)]
    pub balances: Vec<BalanceSnapshot>,
}

impl ChainFixture {
    /// Builds a fixture whose node balances follow every operation of
    /// `blocks`.
    #[must_use]
    pub fn from_history(network: NetworkIdentifier, blocks: Vec<Block>) -> Self {
        let mut running: HashMap<AccountCurrency, Decimal> = HashMap::new();
        let mut balances = Vec::new();
        for block in &blocks {
            for (account_currency, delta) in block.balance_deltas() {
                let value = running.entry(account_currency.clone()).or_default();
                *value += delta;
                balances.push(BalanceSnapshot {
                    account_currency,
                    index: block.identifier.index,
                    value: *value,
                });
            }
        }

        Self {
            network,
            blocks,
            balances,
        }
    }

    /// Removes matching operations from the reported block at `index`
    /// without touching node balances. Returns how many were removed.
    pub fn omit_operations(
        &mut self,
        index: i64,
        mut predicate: impl FnMut(&Operation) -> bool,
    ) -> usize {
        let Some(block) = self
            .blocks
            .iter_mut()
            .find(|block| block.identifier.index == index)
        else {
            return 0;
        };

        let mut removed = 0;
        for tx in &mut block.transactions {
            let before = tx.operations.len();
            tx.operations.retain(|op| !predicate(op));
            removed += before - tx.operations.len();
        }
        removed
    }

    /// Loads a fixture from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| FetchError::Fixture(format!("{}: {}", path.display(), e)))?;
        let fixture: Self = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Fixture(format!("{}: {}", path.display(), e)))?;
        info!(
            path = %path.display(),
            blocks = fixture.blocks.len(),
            "Loaded recorded chain"
        );
        Ok(fixture)
    }
}

/// [`Fetcher`] answering from a [`ChainFixture`].
#[derive(Debug)]
pub struct RecordedChainFetcher {
    network: NetworkIdentifier,
    blocks: BTreeMap<i64, Block>,
    balances: HashMap<AccountCurrency, BTreeMap<i64, Decimal>>,
}

impl RecordedChainFetcher {
    /// Creates a fetcher over `fixture`.
    ///
    /// # Errors
    /// Returns an error if the fixture has no blocks.
    pub fn new(fixture: ChainFixture) -> Result<Self, FetchError> {
        if fixture.blocks.is_empty() {
            return Err(FetchError::Fixture("chain has no blocks".into()));
        }

        let mut balances: HashMap<AccountCurrency, BTreeMap<i64, Decimal>> = HashMap::new();
        for snapshot in fixture.balances {
            balances
                .entry(snapshot.account_currency)
                .or_default()
                .insert(snapshot.index, snapshot.value);
        }

        Ok(Self {
            network: fixture.network,
            blocks: fixture
                .blocks
                .into_iter()
                .map(|block| (block.identifier.index, block))
                .collect(),
            balances,
        })
    }

    fn bounds(&self) -> Result<(&Block, &Block), FetchError> {
        match (self.blocks.values().next(), self.blocks.values().next_back()) {
            (Some(first), Some(last)) => Ok((first, last)),
            _ => Err(FetchError::NotFound("chain has no blocks".into())),
        }
    }

    fn balance_at(&self, account_currency: &AccountCurrency, index: i64) -> Decimal {
        self.balances
            .get(account_currency)
            .and_then(|history| history.range(..=index).next_back())
            .map(|(_, value)| *value)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for RecordedChainFetcher {
    async fn network_status(&self) -> Result<NetworkStatus, FetchError> {
        let (genesis, tip) = self.bounds()?;
        Ok(NetworkStatus {
            network: self.network.clone(),
            genesis_block: genesis.identifier.clone(),
            current_block: tip.identifier.clone(),
        })
    }

    async fn block(&self, index: i64) -> Result<Option<Block>, FetchError> {
        Ok(self.blocks.get(&index).cloned())
    }

    async fn balance(
        &self,
        account_currency: &AccountCurrency,
        at: Option<&BlockIdentifier>,
    ) -> Result<(BlockIdentifier, Decimal), FetchError> {
        let block = match at {
            Some(at) => match self.blocks.get(&at.index) {
                Some(block) if block.identifier == *at => block,
                _ => return Err(FetchError::NotFound(format!("block {}", at))),
            },
            None => self.bounds()?.1,
        };

        let value = self.balance_at(account_currency, block.identifier.index);
        Ok((block.identifier.clone(), value))
    }
}
