use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Balance, Operation, OperationStatus, Points, UserId};

/// Result of trying to claim an order number for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The order was free and is now a New accrual owned by the caller
    Created(Operation),
    AlreadyClaimedBySelf,
    AlreadyClaimedByOther,
}

/// Result of applying a status reported by the accrual authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The accrual moved to the reported status
    Applied,
    /// The transition was not legal from the current status (terminal,
    /// repeated, or a regression); nothing changed
    Unchanged,
    /// No accrual exists for the order number
    NotFound,
}

/// Result of an atomic check-and-withdraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    Committed(Operation),
    InsufficientFunds { available: Points },
}

/// Durable ledger of operations.
///
/// Implementations own every consistency rule: a claim is a single atomic
/// check-and-insert, a withdrawal re-checks the balance and inserts in one
/// serialized step, and reconciliation only applies legal status transitions.
/// Any error is a storage fault; business conflicts are reported through the
/// outcome enums.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Claim `order_number` for `user_id`, unless any user already holds it.
    async fn record_accrual_claim(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> Result<ClaimOutcome>;

    /// Find the accrual recorded for an order number.
    async fn find_accrual_owner(&self, order_number: &str) -> Result<Option<Operation>>;

    /// Accruals still waiting for a final status (New or Processing), oldest first.
    async fn list_pending(&self) -> Result<Vec<Operation>>;

    /// Move an accrual to `status`. The amount is written only when the new
    /// status is Processed and `accrual` is positive.
    async fn apply_reconciliation_result(
        &self,
        order_number: &str,
        status: OperationStatus,
        accrual: Points,
    ) -> Result<ReconcileOutcome>;

    /// Balance derived from the user's Processed operations.
    async fn current_balance(&self, user_id: UserId) -> Result<Balance>;

    /// Withdraw `sum` points if, at this instant, the balance covers it.
    async fn attempt_withdrawal(
        &self,
        user_id: UserId,
        order_number: &str,
        sum: Points,
    ) -> Result<WithdrawalOutcome>;

    /// The user's accruals in submission order.
    async fn list_accruals(&self, user_id: UserId) -> Result<Vec<Operation>>;

    /// The user's withdrawals, oldest first.
    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Operation>>;
}
