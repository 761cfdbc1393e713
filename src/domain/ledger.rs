use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Operation, OperationStatus, Points, UserId};

/// Derived balance of a single user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Net sum of every Processed amount (accruals and withdrawals alike)
    pub current: Points,
    /// Sum of Processed withdrawals, as a positive number
    pub withdrawn: Points,
}

impl Balance {
    pub fn covers(&self, sum: Points) -> bool {
        self.current >= sum
    }
}

/// The user's Processed amounts do not fit in [`Points`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Balance of user {user_id} overflows")]
pub struct BalanceOverflow {
    pub user_id: UserId,
}

/// Compute a user's balance from a list of operations.
/// Only Processed operations count; everything else is still pending or void.
pub fn compute_balance(
    user_id: UserId,
    operations: &[Operation],
) -> Result<Balance, BalanceOverflow> {
    operations
        .iter()
        .filter(|op| op.user_id == user_id && op.status == OperationStatus::Processed)
        .try_fold(Balance::default(), |balance, op| {
            Some(Balance {
                current: balance.current.checked_add(op.amount)?,
                withdrawn: balance.withdrawn.checked_add(op.withdrawn_sum())?,
            })
        })
        .ok_or(BalanceOverflow { user_id })
}
