use crate::entities::account::{AccountCurrency, AccountIdentifier, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a block unambiguously. `index` is the total order key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub index: i64,
    pub hash: String,
}

impl BlockIdentifier {
    pub fn new(index: i64, hash: impl Into<String>) -> Self {
        Self {
            index,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for BlockIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: Decimal,
    pub currency: Currency,
}

impl Amount {
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub index: u64,
    pub account: AccountIdentifier,
    pub amount: Amount,
}

impl Operation {
    pub fn account_currency(&self) -> AccountCurrency {
        AccountCurrency::new(self.account.clone(), self.amount.currency.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub identifier: BlockIdentifier,
    pub parent_identifier: BlockIdentifier,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Genesis blocks point at themselves (or at nothing older).
    pub fn is_genesis(&self) -> bool {
        self.parent_identifier.index >= self.identifier.index
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.transactions.iter().flat_map(|tx| tx.operations.iter())
    }

    pub fn operation_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.operations.len()).sum()
    }

    /// Net balance change per account currency, in first-seen order.
    pub fn balance_deltas(&self) -> Vec<(AccountCurrency, Decimal)> {
        let mut deltas: Vec<(AccountCurrency, Decimal)> = Vec::new();
        for op in self.operations() {
            let key = op.account_currency();
            match deltas.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, delta)) => *delta += op.amount.value,
                None => deltas.push((key, op.amount.value)),
            }
        }
        deltas
    }
}
