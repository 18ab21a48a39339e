//! Shared fixtures for tests.

use crate::fetcher::{ChainFixture, FetchError, Fetcher, NetworkStatus, RecordedChainFetcher};
use async_trait::async_trait;
use ledger_check_data::{EphemeralStorage, StorageError, StorageProvisioner, TempDirProvisioner};
use ledger_check_domain::entities::{
    AccountCurrency, AccountIdentifier, Amount, Block, BlockIdentifier, Currency,
    NetworkIdentifier, Operation, Transaction,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn alice() -> AccountCurrency {
    AccountCurrency::new(AccountIdentifier::new("alice"), Currency::new("BTC", 8))
}

pub fn bob() -> AccountCurrency {
    AccountCurrency::new(AccountIdentifier::new("bob"), Currency::new("BTC", 8))
}

fn operation(index: u64, account_currency: AccountCurrency, value: Decimal) -> Operation {
    Operation {
        index,
        account: account_currency.account,
        amount: Amount::new(value, account_currency.currency),
    }
}

/// Blocks `0..=last` where every block credits alice twice and bob once.
/// When `missing` is set, the second alice credit is dropped from the
/// reported block at that index while node balances keep it.
pub fn chain_fixture(last: i64, missing: Option<i64>) -> ChainFixture {
    let blocks = (0..=last)
        .map(|index| Block {
            identifier: BlockIdentifier::new(index, format!("0x{index:04x}")),
            parent_identifier: BlockIdentifier::new(
                (index - 1).max(0),
                format!("0x{:04x}", (index - 1).max(0)),
            ),
            transactions: vec![Transaction {
                hash: format!("tx-{index}"),
                operations: vec![
                    operation(0, alice(), dec!(1)),
                    operation(1, alice(), dec!(2)),
                    operation(2, bob(), dec!(5)),
                ],
            }],
        })
        .collect();

    let mut fixture = ChainFixture::from_history(NetworkIdentifier::new("bitcoin", "regtest"), blocks);
    if let Some(index) = missing {
        let account = alice().account;
        fixture.omit_operations(index, |op| op.account == account && op.index == 1);
    }
    fixture
}

pub fn chain(last: i64, missing: Option<i64>) -> Arc<dyn Fetcher> {
    Arc::new(RecordedChainFetcher::new(chain_fixture(last, missing)).unwrap())
}

/// Provisioner tracking how many instances exist at once.
#[derive(Default)]
pub struct CountingProvisioner {
    inner: TempDirProvisioner,
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    provisioned: AtomicUsize,
}

impl CountingProvisioner {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProvisioner for CountingProvisioner {
    async fn provision(&self) -> Result<EphemeralStorage, StorageError> {
        let storage = self.inner.provision().await?;
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let open = self.open.clone();
        Ok(storage.with_release_hook(move || {
            open.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

/// Fetcher whose historical balance lookups always fail.
pub struct NoHistoryFetcher(pub Arc<dyn Fetcher>);

#[async_trait]
impl Fetcher for NoHistoryFetcher {
    async fn network_status(&self) -> Result<NetworkStatus, FetchError> {
        self.0.network_status().await
    }

    async fn block(&self, index: i64) -> Result<Option<Block>, FetchError> {
        self.0.block(index).await
    }

    async fn balance(
        &self,
        account_currency: &AccountCurrency,
        at: Option<&BlockIdentifier>,
    ) -> Result<(BlockIdentifier, Decimal), FetchError> {
        match at {
            Some(at) => Err(FetchError::NotFound(format!("pruned state at {at}"))),
            None => self.0.balance(account_currency, None).await,
        }
    }
}
