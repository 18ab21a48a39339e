//! Classification of how a check ended.

use crate::pipeline::PipelineError;
use ledger_check_domain::entities::{AccountCurrency, BlockIdentifier};
use ledger_check_domain::value_objects::{ReconciliationFailure, Verdict};
use primitive_types::U256;

/// What is known about a check once its tasks have stopped.
#[derive(Debug)]
pub struct TerminalState<'a> {
    /// An operator abort was requested.
    pub aborted: bool,
    /// First error returned by the pipeline.
    pub error: Option<&'a PipelineError>,
    /// Active plus inactive reconciliations, `None` if unreadable.
    pub reconciliations: Option<U256>,
    /// Inactive failure the check halted on.
    pub inactive_failure: Option<ReconciliationFailure>,
    /// Whether balances can be looked up at a given block.
    pub lookup_balance_by_block: bool,
}

/// Result of classifying a [`TerminalState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do.
    Verdict(Verdict),
    /// Search for the block that dropped operations of `account_currency`,
    /// at or before `observed_at`.
    Localize {
        /// Account currency that failed.
        account_currency: AccountCurrency,
        /// Head at which the failure was observed.
        observed_at: BlockIdentifier,
    },
}

/// Decides the outcome of a check. The first matching rule wins:
/// abort, clean completion, failure without an inactive failure, inactive
/// failure without historical lookup, and finally localization.
pub fn classify_outcome(state: TerminalState<'_>) -> Outcome {
    if state.aborted {
        return Outcome::Verdict(Verdict::Halted);
    }

    let Some(error) = state.error else {
        let verdict = match state.reconciliations {
            Some(count) if count.is_zero() => Verdict::PassedWithWarning,
            _ => Verdict::Passed,
        };
        return Outcome::Verdict(verdict);
    };

    let Some(failure) = state.inactive_failure else {
        return Outcome::Verdict(Verdict::Failed {
            reason: error.to_string(),
        });
    };

    if !state.lookup_balance_by_block {
        return Outcome::Verdict(Verdict::DiagnosisUnavailable {
            reason: failure.to_string(),
        });
    }

    Outcome::Localize {
        account_currency: failure.account_currency().clone(),
        observed_at: failure.detected_at().clone(),
    }
}
