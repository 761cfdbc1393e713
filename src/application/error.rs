use thiserror::Error;

/// Faults surfaced by the services. Business conflicts and bad input are not
/// errors; they are reported through the outcome enums.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Why a request was rejected before reaching the ledger.
/// Always recoverable by correcting the input; never retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("empty")]
    Empty,

    #[error("bad-format")]
    BadFormat,

    #[error("non-positive-sum")]
    NonPositiveSum,

    #[error("bad-order-format")]
    BadOrderFormat,
}
