//! Names of the monotonic counters kept by every storage instance.

pub const BLOCK_COUNTER: &str = "blocks";
pub const TRANSACTION_COUNTER: &str = "transactions";
pub const OPERATION_COUNTER: &str = "operations";
pub const SEEN_ACCOUNT_COUNTER: &str = "seen_accounts";
pub const ACTIVE_RECONCILIATION_COUNTER: &str = "active_reconciliations";
pub const INACTIVE_RECONCILIATION_COUNTER: &str = "inactive_reconciliations";
pub const EXEMPT_RECONCILIATION_COUNTER: &str = "exempt_reconciliations";
pub const SKIPPED_RECONCILIATION_COUNTER: &str = "skipped_reconciliations";
pub const FAILED_RECONCILIATION_COUNTER: &str = "failed_reconciliations";

/// Every counter, in reporting order.
pub const ALL_COUNTERS: [&str; 9] = [
    BLOCK_COUNTER,
    TRANSACTION_COUNTER,
    OPERATION_COUNTER,
    SEEN_ACCOUNT_COUNTER,
    ACTIVE_RECONCILIATION_COUNTER,
    INACTIVE_RECONCILIATION_COUNTER,
    EXEMPT_RECONCILIATION_COUNTER,
    SKIPPED_RECONCILIATION_COUNTER,
    FAILED_RECONCILIATION_COUNTER,
];
