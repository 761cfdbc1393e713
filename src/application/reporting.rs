use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    Balance, Operation, OperationStatus, Points, serialize_optional_points, serialize_points,
};

/// An accrual as shown to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub number: String,
    pub status: OperationStatus,
    /// Present only once the order is Processed with a positive accrual
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_points"
    )]
    pub accrual: Option<Points>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&Operation> for OrderView {
    fn from(op: &Operation) -> Self {
        Self {
            number: op.order_number.clone(),
            status: op.status,
            accrual: op.accrual(),
            uploaded_at: op.processed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalView {
    pub order: String,
    #[serde(serialize_with = "serialize_points")]
    pub sum: Points,
    pub processed_at: DateTime<Utc>,
}

impl From<&Operation> for WithdrawalView {
    fn from(op: &Operation) -> Self {
        Self {
            order: op.order_number.clone(),
            sum: op.withdrawn_sum(),
            processed_at: op.processed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BalanceView {
    #[serde(serialize_with = "serialize_points")]
    pub current: Points,
    #[serde(serialize_with = "serialize_points")]
    pub withdrawn: Points,
}

impl From<Balance> for BalanceView {
    fn from(balance: Balance) -> Self {
        Self {
            current: balance.current,
            withdrawn: balance.withdrawn,
        }
    }
}

/// Everything a user can see about their account.
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub generated_at: DateTime<Utc>,
    pub balance: BalanceView,
    pub orders: Vec<OrderView>,
    pub withdrawals: Vec<WithdrawalView>,
}
