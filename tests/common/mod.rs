// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use loyalty_ledger::accrual::{AccrualAuthority, AccrualError, AuthorityReply};
use loyalty_ledger::config::PollerConfig;
use loyalty_ledger::domain::{OperationStatus, Points, UserId};
use loyalty_ledger::storage::{ClaimOutcome, LedgerStore, ReconcileOutcome, SqliteLedger};
use tempfile::TempDir;

/// Helper to create a ledger backed by a temporary database
pub async fn test_ledger() -> Result<(Arc<SqliteLedger>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let ledger = SqliteLedger::init(&format!("sqlite:{}", db_path.display())).await?;
    Ok((Arc::new(ledger), temp_dir))
}

/// Append the Luhn check digit to a digit payload.
pub fn with_check_digit(payload: &str) -> String {
    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(position, byte)| {
            let mut digit = u32::from(byte - b'0');
            // The check digit will take position 0, so the payload's first
            // digit from the right is doubled.
            if position % 2 == 0 {
                digit *= 2;
                if digit > 9 {
                    digit -= 9;
                }
            }
            digit
        })
        .sum();
    format!("{}{}", payload, (10 - sum % 10) % 10)
}

/// Give a user `points` through a Processed accrual on `order_number`.
pub async fn credit(
    store: &dyn LedgerStore,
    user_id: UserId,
    order_number: &str,
    points: Points,
) -> Result<()> {
    let claim = store.record_accrual_claim(user_id, order_number).await?;
    assert!(matches!(claim, ClaimOutcome::Created(_)));
    let outcome = store
        .apply_reconciliation_result(order_number, OperationStatus::Processed, points)
        .await?;
    assert_eq!(outcome, ReconcileOutcome::Applied);
    Ok(())
}

/// Poller settings with short waits so tests stay fast
pub fn fast_poller_config() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(20),
        request_timeout: Duration::from_millis(500),
        max_retries: 2,
        retry_wait: Duration::from_millis(10),
    }
}

/// Accrual authority fake that plays back queued replies per order.
///
/// Once an order's queue is empty the last reply repeats; orders with no
/// script are answered as not registered.
#[derive(Default)]
pub struct ScriptedAuthority {
    scripts: Mutex<HashMap<String, VecDeque<Result<AuthorityReply, AccrualError>>>>,
    last: Mutex<HashMap<String, Result<AuthorityReply, AccrualError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, order: &str, reply: Result<AuthorityReply, AccrualError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(order.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push_status(&self, order: &str, status: OperationStatus, accrual: Points) {
        self.push(order, Ok(AuthorityReply::Status { status, accrual }));
    }

    /// Order numbers asked about, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccrualAuthority for ScriptedAuthority {
    async fn fetch_order(&self, order_number: &str) -> Result<AuthorityReply, AccrualError> {
        self.calls.lock().unwrap().push(order_number.to_string());

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(order_number)
            .and_then(|queue| queue.pop_front());

        let mut last = self.last.lock().unwrap();
        match next {
            Some(reply) => {
                last.insert(order_number.to_string(), reply.clone());
                reply
            }
            None => last
                .get(order_number)
                .cloned()
                .unwrap_or(Ok(AuthorityReply::NotRegistered)),
        }
    }
}
