use crate::entities::{AccountCurrency, BlockIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final, user-facing outcome of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    /// Passed without performing a single reconciliation.
    PassedWithWarning,
    Failed {
        reason: String,
    },
    /// Failure that cannot be localized with the current configuration.
    DiagnosisUnavailable {
        reason: String,
    },
    Diagnosed {
        account_currency: AccountCurrency,
        block: BlockIdentifier,
    },
    LocalizationExhausted {
        reason: String,
    },
    Halted,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed | Self::PassedWithWarning)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "Check succeeded"),
            Self::PassedWithWarning => write!(
                f,
                "Check succeeded, however, no reconciliations were performed!"
            ),
            Self::Failed { reason } => write!(f, "Check failed: {}", reason),
            Self::DiagnosisUnavailable { reason } => write!(
                f,
                "Check failed: {}. Can't find the block missing operations automatically, \
                 enable historical balance lookup",
                reason
            ),
            Self::Diagnosed {
                account_currency,
                block,
            } => write!(
                f,
                "Missing operations for {} in block {}",
                account_currency, block
            ),
            Self::LocalizationExhausted { reason } => write!(
                f,
                "Could not find block with missing operations: {}",
                reason
            ),
            Self::Halted => write!(f, "Check halted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_passes_are_successful() {
        assert_eq!(Verdict::Passed.exit_code(), 0);
        assert_eq!(Verdict::PassedWithWarning.exit_code(), 0);
        assert_eq!(Verdict::Halted.exit_code(), 1);
        assert_eq!(
            Verdict::Failed {
                reason: "boom".into()
            }
            .exit_code(),
            1
        );
        assert!(
            !Verdict::LocalizationExhausted {
                reason: "none left".into()
            }
            .is_success()
        );
    }
}
