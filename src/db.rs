//! Submitted job ids are kept in a SQLite ledger next to the run

/// Connect to a SQLite database
pub mod open;
pub mod state;
/// Record and list submissions
pub mod ledger;

pub use ledger::LedgerRow;
pub use open::Ledger;
pub use state::SubmissionState;
