//! Reconciliation poller.
//!
//! Background task that periodically asks the accrual authority about every
//! pending accrual (New or Processing) and writes back what it learns. Each
//! order is handled independently: a failure for one order is logged and the
//! order is simply retried on a later tick.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::domain::format_points;
use crate::storage::{LedgerStore, ReconcileOutcome};

use super::{AccrualAuthority, AuthorityReply};

/// Counters for a single pass over the pending accruals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Orders the authority was asked about
    pub checked: usize,
    /// Status changes written to the ledger
    pub applied: usize,
    /// Replies that did not change anything (repeat, regression, terminal)
    pub unchanged: usize,
    /// Orders the authority does not know about yet
    pub deferred: usize,
    /// Orders skipped because of an authority or storage failure
    pub failed: usize,
}

pub struct ReconciliationPoller {
    store: Arc<dyn LedgerStore>,
    authority: Arc<dyn AccrualAuthority>,
    config: PollerConfig,
    shutdown_token: CancellationToken,
}

impl ReconciliationPoller {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        authority: Arc<dyn AccrualAuthority>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            authority,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the poller when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the polling loop.
    ///
    /// The loop exits once the shutdown token is cancelled. An in-flight tick
    /// stops before its next order.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.config.interval, "Reconciliation poller started");

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Reconciliation poller received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.interval) => {
                        match self.tick().await {
                            Ok(report) if report.checked > 0 => {
                                info!(
                                    checked = report.checked,
                                    applied = report.applied,
                                    unchanged = report.unchanged,
                                    deferred = report.deferred,
                                    failed = report.failed,
                                    "Reconciliation tick finished"
                                );
                            }
                            Ok(_) => debug!("No pending accruals"),
                            Err(e) => error!(error = %e, "Reconciliation tick failed"),
                        }
                    }
                }
            }

            info!("Reconciliation poller stopped");
        })
    }

    /// One pass over every pending accrual.
    ///
    /// Only failing to list the pending accruals is an error; per-order
    /// failures are counted in the report.
    pub async fn tick(&self) -> Result<TickReport> {
        let pending = self.store.list_pending().await?;
        let mut report = TickReport::default();

        for operation in pending {
            if self.shutdown_token.is_cancelled() {
                debug!("Shutdown requested, leaving remaining orders for later");
                break;
            }

            let order = operation.order_number.as_str();
            report.checked += 1;

            let (status, accrual) = match self.authority.fetch_order(order).await {
                Ok(AuthorityReply::NotRegistered) => {
                    debug!(order = %order, "Order not registered with accrual authority yet");
                    report.deferred += 1;
                    continue;
                }
                Ok(AuthorityReply::Status { status, accrual }) => (status, accrual),
                Err(e) => {
                    warn!(order = %order, error = %e, "Failed to fetch accrual status");
                    report.failed += 1;
                    continue;
                }
            };

            match self
                .store
                .apply_reconciliation_result(order, status, accrual)
                .await
            {
                Ok(ReconcileOutcome::Applied) => {
                    info!(
                        order = %order,
                        status = %status,
                        accrual = %format_points(accrual),
                        "Accrual status updated"
                    );
                    report.applied += 1;
                }
                Ok(ReconcileOutcome::Unchanged) => {
                    debug!(order = %order, status = %status, "Accrual status unchanged");
                    report.unchanged += 1;
                }
                Ok(ReconcileOutcome::NotFound) => {
                    warn!(order = %order, "Pending accrual disappeared before update");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(order = %order, error = %e, "Failed to store accrual status");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Request the loop to stop.
    pub fn shutdown(&self) {
        info!("Shutting down reconciliation poller");
        self.shutdown_token.cancel();
    }
}
