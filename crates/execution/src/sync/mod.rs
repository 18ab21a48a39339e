//! Sequential block ingestion.
//!
//! Provides:
//! - The syncer driving block workers in index order
//! - The balance worker computing balances from block operations

mod balance_worker;
mod syncer;

pub use balance_worker::*;
pub use syncer::*;
