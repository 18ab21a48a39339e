pub mod failure;
pub mod verdict;
pub mod window;

pub use failure::{ReconciliationFailure, ReconciliationKind};
pub use verdict::Verdict;
pub use window::SearchWindow;
