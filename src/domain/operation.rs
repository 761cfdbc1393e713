use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Points;

pub type OperationId = Uuid;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Points awarded for a submitted order, pending reconciliation
    Accrual,
    /// Points spent against an order, final once recorded
    Withdrawal,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Accrual => "accrual",
            OperationKind::Withdrawal => "withdrawal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "accrual" => Some(OperationKind::Accrual),
            "withdrawal" => Some(OperationKind::Withdrawal),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Processing status of an operation.
///
/// Accruals move `New -> Processing -> {Invalid | Processed}`; the authority
/// may also jump from `New` straight to either terminal state. Withdrawals are
/// born `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::New => "NEW",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Invalid => "INVALID",
            OperationStatus::Processed => "PROCESSED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(OperationStatus::New),
            "PROCESSING" => Some(OperationStatus::Processing),
            "INVALID" => Some(OperationStatus::Invalid),
            "PROCESSED" => Some(OperationStatus::Processed),
            _ => None,
        }
    }

    /// Invalid and Processed never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Invalid | OperationStatus::Processed)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses from which a move to `self` is a legal transition.
    pub fn predecessors(&self) -> &'static [OperationStatus] {
        match self {
            OperationStatus::New => &[],
            OperationStatus::Processing => &[OperationStatus::New],
            OperationStatus::Invalid | OperationStatus::Processed => {
                &[OperationStatus::New, OperationStatus::Processing]
            }
        }
    }

    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single ledger entry. Operations are never deleted; only an accrual's
/// status and amount change, and only through reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Monotonically increasing sequence number assigned by the store
    pub sequence: i64,
    pub user_id: UserId,
    pub order_number: String,
    /// Signed: positive for accruals, negative for withdrawals
    pub amount: Points,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Creation time, or time of the last status change
    pub processed_at: DateTime<Utc>,
}

impl Operation {
    /// A freshly claimed accrual: status New, zero amount.
    /// Sequence number must be assigned by the store.
    pub fn new_accrual(user_id: UserId, order_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sequence: 0,
            user_id,
            order_number: order_number.into(),
            amount: 0,
            kind: OperationKind::Accrual,
            status: OperationStatus::New,
            processed_at: Utc::now(),
        }
    }

    /// A withdrawal of `sum` points, recorded as a negative Processed amount.
    /// `sum` must be positive.
    pub fn new_withdrawal(user_id: UserId, order_number: impl Into<String>, sum: Points) -> Self {
        debug_assert!(sum > 0, "Withdrawal sum must be positive");
        Self {
            id: Uuid::now_v7(),
            sequence: 0,
            user_id,
            order_number: order_number.into(),
            amount: -sum,
            kind: OperationKind::Withdrawal,
            status: OperationStatus::Processed,
            processed_at: Utc::now(),
        }
    }

    pub fn is_accrual(&self) -> bool {
        self.kind == OperationKind::Accrual
    }

    pub fn is_withdrawal(&self) -> bool {
        self.kind == OperationKind::Withdrawal
    }

    /// Points credited by an accrual; `None` until it is Processed with a
    /// positive amount.
    pub fn accrual(&self) -> Option<Points> {
        (self.is_accrual() && self.amount > 0).then_some(self.amount)
    }

    /// Points spent by a withdrawal, as a positive number.
    pub fn withdrawn_sum(&self) -> Points {
        if self.is_withdrawal() { -self.amount } else { 0 }
    }
}
