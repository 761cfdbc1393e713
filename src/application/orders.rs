use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::{Operation, UserId, is_valid_order_number};
use crate::storage::{ClaimOutcome, LedgerStore};

use super::{AppError, OrderView, RejectReason};

/// Result of submitting an order number for accrual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The order is now registered to the user and awaits reconciliation
    Accepted(Operation),
    /// The user had already submitted this order
    AlreadyMine,
    /// Another user owns this order
    ClaimedByOther,
    Rejected(RejectReason),
}

/// Order submission and listing.
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
}

impl OrderService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Submit an order number on behalf of a user.
    ///
    /// Conflicts are terminal outcomes, not faults, and are never retried.
    pub async fn submit(&self, user_id: UserId, raw_number: &str) -> Result<SubmitOutcome, AppError> {
        let number = raw_number.trim();
        if number.is_empty() {
            warn!(user_id, "Empty order number");
            return Ok(SubmitOutcome::Rejected(RejectReason::Empty));
        }
        if !is_valid_order_number(number) {
            debug!(user_id, order = %number, "Luhn check failed");
            return Ok(SubmitOutcome::Rejected(RejectReason::BadFormat));
        }

        let outcome = match self.store.record_accrual_claim(user_id, number).await? {
            ClaimOutcome::Created(operation) => {
                info!(user_id, order = %number, "Order uploaded");
                SubmitOutcome::Accepted(operation)
            }
            ClaimOutcome::AlreadyClaimedBySelf => {
                debug!(user_id, order = %number, "Order already uploaded by user");
                SubmitOutcome::AlreadyMine
            }
            ClaimOutcome::AlreadyClaimedByOther => {
                warn!(user_id, order = %number, "Order belongs to another user");
                SubmitOutcome::ClaimedByOther
            }
        };
        Ok(outcome)
    }

    /// The user's orders, oldest first. Empty when nothing was submitted.
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderView>, AppError> {
        let accruals = self.store.list_accruals(user_id).await?;
        Ok(accruals.iter().map(OrderView::from).collect())
    }
}
