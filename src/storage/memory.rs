//! In-memory ledger.
//!
//! Used for tests and local runs without a database. The whole ledger sits
//! behind one mutex and every operation is a single synchronous critical
//! section, so check-and-act steps are atomic and the lock is never held
//! across an await.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow, ensure};
use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{
    Balance, MAX_ACCRUAL, Operation, OperationStatus, Points, UserId, compute_balance,
};

use super::{ClaimOutcome, LedgerStore, ReconcileOutcome, WithdrawalOutcome};

#[derive(Default)]
struct LedgerState {
    operations: Vec<Operation>,
    next_sequence: i64,
}

impl LedgerState {
    fn append(&mut self, mut operation: Operation) -> Operation {
        self.next_sequence += 1;
        operation.sequence = self.next_sequence;
        self.operations.push(operation.clone());
        operation
    }

    fn accrual_mut(&mut self, order_number: &str) -> Option<&mut Operation> {
        self.operations
            .iter_mut()
            .find(|op| op.is_accrual() && op.order_number == order_number)
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations recorded so far.
    pub fn operation_count(&self) -> Result<usize> {
        Ok(self.lock()?.operations.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Ledger state lock poisoned"))
    }

    fn list_matching(&self, predicate: impl Fn(&Operation) -> bool) -> Result<Vec<Operation>> {
        Ok(self
            .lock()?
            .operations
            .iter()
            .filter(|op| predicate(op))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn record_accrual_claim(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> Result<ClaimOutcome> {
        let mut state = self.lock()?;

        if let Some(existing) = state.accrual_mut(order_number) {
            return Ok(if existing.user_id == user_id {
                ClaimOutcome::AlreadyClaimedBySelf
            } else {
                ClaimOutcome::AlreadyClaimedByOther
            });
        }

        let operation = state.append(Operation::new_accrual(user_id, order_number));
        Ok(ClaimOutcome::Created(operation))
    }

    async fn find_accrual_owner(&self, order_number: &str) -> Result<Option<Operation>> {
        Ok(self
            .lock()?
            .operations
            .iter()
            .find(|op| op.is_accrual() && op.order_number == order_number)
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<Operation>> {
        self.list_matching(|op| op.is_accrual() && op.status.is_pending())
    }

    async fn apply_reconciliation_result(
        &self,
        order_number: &str,
        status: OperationStatus,
        accrual: Points,
    ) -> Result<ReconcileOutcome> {
        ensure!(
            accrual <= MAX_ACCRUAL,
            "Accrual {} for order {} exceeds the limit",
            accrual,
            order_number
        );
        let mut state = self.lock()?;

        let Some(operation) = state.accrual_mut(order_number) else {
            return Ok(ReconcileOutcome::NotFound);
        };
        if !operation.status.can_transition_to(status) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        operation.status = status;
        if status == OperationStatus::Processed && accrual > 0 {
            operation.amount = accrual;
        }
        operation.processed_at = Utc::now();
        Ok(ReconcileOutcome::Applied)
    }

    async fn current_balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(compute_balance(user_id, &self.lock()?.operations)?)
    }

    async fn attempt_withdrawal(
        &self,
        user_id: UserId,
        order_number: &str,
        sum: Points,
    ) -> Result<WithdrawalOutcome> {
        ensure!(sum > 0, "Withdrawal sum must be positive, got {}", sum);
        let mut state = self.lock()?;

        let balance = compute_balance(user_id, &state.operations)?;
        if !balance.covers(sum) {
            return Ok(WithdrawalOutcome::InsufficientFunds {
                available: balance.current,
            });
        }

        let operation = state.append(Operation::new_withdrawal(user_id, order_number, sum));
        Ok(WithdrawalOutcome::Committed(operation))
    }

    async fn list_accruals(&self, user_id: UserId) -> Result<Vec<Operation>> {
        self.list_matching(|op| op.user_id == user_id && op.is_accrual())
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Operation>> {
        self.list_matching(|op| op.user_id == user_id && op.is_withdrawal())
    }
}
