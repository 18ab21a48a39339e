//! Balance reconciliation.
//!
//! Provides:
//! - Active checks of every balance change, before the syncer advances
//! - Inactive sweeps re-checking seen accounts as the head moves
//! - Result handling and failure recording

mod handler;
mod reconciler;

pub use handler::*;
pub use reconciler::*;
