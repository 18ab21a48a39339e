pub mod account;
pub mod block;
pub mod network;

// Re-export for easier access
pub use account::{AccountCurrency, AccountIdentifier, Currency};
pub use block::{Amount, Block, BlockIdentifier, Operation, Transaction};
pub use network::NetworkIdentifier;
