use crate::entities::{AccountCurrency, BlockIdentifier};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconciliationKind {
    /// Triggered by a block that changed the account.
    Active,
    /// Periodic sweep over every seen account.
    Inactive,
}

impl fmt::Display for ReconciliationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// A computed balance that disagreed with the balance reported by the node.
///
/// Only active failures are bound to the block that caused them. An
/// inactive failure only knows the head it was observed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationFailure {
    Active {
        account_currency: AccountCurrency,
        block: BlockIdentifier,
        computed: Decimal,
        live: Decimal,
    },
    Inactive {
        account_currency: AccountCurrency,
        observed_at: BlockIdentifier,
        computed: Decimal,
        live: Decimal,
    },
}

impl ReconciliationFailure {
    pub fn kind(&self) -> ReconciliationKind {
        match self {
            Self::Active { .. } => ReconciliationKind::Active,
            Self::Inactive { .. } => ReconciliationKind::Inactive,
        }
    }

    pub fn account_currency(&self) -> &AccountCurrency {
        match self {
            Self::Active {
                account_currency, ..
            }
            | Self::Inactive {
                account_currency, ..
            } => account_currency,
        }
    }

    /// The block that broke consistency, known only for active failures.
    pub fn causal_block(&self) -> Option<&BlockIdentifier> {
        match self {
            Self::Active { block, .. } => Some(block),
            Self::Inactive { .. } => None,
        }
    }

    /// Block at which the mismatch was detected.
    pub fn detected_at(&self) -> &BlockIdentifier {
        match self {
            Self::Active { block, .. } => block,
            Self::Inactive { observed_at, .. } => observed_at,
        }
    }
}

impl fmt::Display for ReconciliationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (computed, live) = match self {
            Self::Active { computed, live, .. } | Self::Inactive { computed, live, .. } => {
                (computed, live)
            }
        };
        write!(
            f,
            "{} reconciliation failed for {} at block {}: computed {} but node reported {}",
            self.kind(),
            self.account_currency(),
            self.detected_at(),
            computed,
            live
        )
    }
}
