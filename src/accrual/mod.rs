// Accrual authority integration - HTTP client and the background poller
// that reconciles pending accruals.

mod client;
mod poller;

pub use client::*;
pub use poller::*;
