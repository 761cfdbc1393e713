use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{Balance, Operation, Points, UserId, format_points, is_valid_order_number};
use crate::storage::{LedgerStore, WithdrawalOutcome};

use super::{AppError, RejectReason, WithdrawalView};

/// Result of a withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Committed(Operation),
    InsufficientFunds { available: Points, requested: Points },
    Rejected(RejectReason),
}

/// Withdrawals and balance queries.
pub struct BalanceService {
    store: Arc<dyn LedgerStore>,
}

impl BalanceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Spend `sum` points against an order number.
    ///
    /// The order number only tags the withdrawal; it need not exist in the
    /// ledger, but it must pass the checksum.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        raw_number: &str,
        sum: Points,
    ) -> Result<WithdrawOutcome, AppError> {
        if sum <= 0 {
            warn!(user_id, sum, "Non-positive withdrawal sum");
            return Ok(WithdrawOutcome::Rejected(RejectReason::NonPositiveSum));
        }

        let number = raw_number.trim();
        if !is_valid_order_number(number) {
            warn!(user_id, order = %number, "Invalid withdrawal order number");
            return Ok(WithdrawOutcome::Rejected(RejectReason::BadOrderFormat));
        }

        let outcome = match self.store.attempt_withdrawal(user_id, number, sum).await? {
            WithdrawalOutcome::Committed(operation) => {
                info!(
                    user_id,
                    order = %number,
                    sum = %format_points(sum),
                    "Withdrawal successful"
                );
                WithdrawOutcome::Committed(operation)
            }
            WithdrawalOutcome::InsufficientFunds { available } => {
                warn!(
                    user_id,
                    available = %format_points(available),
                    requested = %format_points(sum),
                    "Insufficient funds"
                );
                WithdrawOutcome::InsufficientFunds {
                    available,
                    requested: sum,
                }
            }
        };
        Ok(outcome)
    }

    /// Current balance and total withdrawn.
    pub async fn balance_snapshot(&self, user_id: UserId) -> Result<Balance, AppError> {
        Ok(self.store.current_balance(user_id).await?)
    }

    /// The user's withdrawals, oldest first.
    pub async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<WithdrawalView>, AppError> {
        let withdrawals = self.store.list_withdrawals(user_id).await?;
        Ok(withdrawals.iter().map(WithdrawalView::from).collect())
    }
}
