//! Data model shared by the ledger checker crates.

pub mod counters;
pub mod entities;
pub mod error;
pub mod value_objects;

pub use error::DomainError;
pub use primitive_types::U256;
