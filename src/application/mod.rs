// Application layer - use cases on top of the ledger store.
// Services return outcome enums for every business result and reserve
// AppError for faults.

mod balance;
mod error;
mod orders;
mod reporting;

pub use balance::*;
pub use error::*;
pub use orders::*;
pub use reporting::*;
