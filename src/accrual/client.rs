//! Client for the external accrual authority.
//!
//! The authority answers `GET <base>/api/orders/{number}`:
//! - `200` with `{order, status, accrual?}`
//! - `204` while it knows nothing about the order yet
//! - `429` / `5xx` when it is overloaded or failing (retriable)
//!
//! It sits outside our control, so every request is bounded by a timeout and
//! retriable failures are retried a fixed number of times with a fixed pause.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::PollerConfig;
use crate::domain::{OperationStatus, Points, points_from_f64};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccrualError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by accrual authority")]
    RateLimited,

    #[error("Accrual authority server error: HTTP {0}")]
    Server(u16),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    #[error("Unknown order status from accrual authority: {0}")]
    UnknownStatus(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl AccrualError {
    /// Transient faults worth another attempt within the same tick.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AccrualError::Timeout(_)
                | AccrualError::RateLimited
                | AccrualError::Server(_)
                | AccrualError::Transport(_)
        )
    }
}

// =============================================================================
// Replies
// =============================================================================

/// What the authority knows about an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityReply {
    /// `204`: the order is not registered with the authority yet
    NotRegistered,
    /// `200` with a recognized status; `accrual` is only meaningful when Processed
    Status {
        status: OperationStatus,
        accrual: Points,
    },
}

#[derive(Debug, Deserialize)]
struct OrderReply {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<f64>,
}

/// Map the authority's status vocabulary onto ours.
pub fn parse_authority_status(status: &str) -> Option<OperationStatus> {
    match status {
        "REGISTERED" | "NEW" => Some(OperationStatus::New),
        "PROCESSING" => Some(OperationStatus::Processing),
        "INVALID" => Some(OperationStatus::Invalid),
        "PROCESSED" => Some(OperationStatus::Processed),
        _ => None,
    }
}

/// Source of reconciliation results.
#[async_trait]
pub trait AccrualAuthority: Send + Sync {
    /// Ask about one order. Retries, if any, happen inside.
    async fn fetch_order(&self, order_number: &str) -> Result<AuthorityReply, AccrualError>;
}

// =============================================================================
// HTTP client
// =============================================================================

pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    max_retries: u32,
    retry_wait: Duration,
}

impl HttpAccrualClient {
    pub fn new(base_url: impl Into<String>, config: &PollerConfig) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            retry_wait: config.retry_wait,
        }
    }

    fn order_url(&self, order_number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }

    /// One request, no retries.
    async fn fetch_once(&self, order_number: &str) -> Result<AuthorityReply, AccrualError> {
        let url = self.order_url(order_number);

        let response = timeout(self.request_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| AccrualError::Timeout(self.request_timeout))?
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::NO_CONTENT => return Ok(AuthorityReply::NotRegistered),
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => return Err(AccrualError::RateLimited),
            s if s.is_server_error() => return Err(AccrualError::Server(s.as_u16())),
            s => return Err(AccrualError::UnexpectedStatus(s.as_u16())),
        }

        let body = timeout(self.request_timeout, response.text())
            .await
            .map_err(|_| AccrualError::Timeout(self.request_timeout))?
            .map_err(|e| AccrualError::Transport(e.to_string()))?;
        let reply: OrderReply =
            serde_json::from_str(&body).map_err(|e| AccrualError::Decode(e.to_string()))?;
        if reply.order != order_number {
            warn!(order = %order_number, reported = %reply.order, "Accrual reply names another order");
        }

        let status = parse_authority_status(&reply.status)
            .ok_or_else(|| AccrualError::UnknownStatus(reply.status.clone()))?;
        let accrual = match (status, reply.accrual) {
            (OperationStatus::Processed, Some(value)) => points_from_f64(value).ok_or_else(|| {
                AccrualError::Decode(format!("accrual out of range: {}", value))
            })?,
            _ => 0,
        };

        Ok(AuthorityReply::Status { status, accrual })
    }
}

#[async_trait]
impl AccrualAuthority for HttpAccrualClient {
    async fn fetch_order(&self, order_number: &str) -> Result<AuthorityReply, AccrualError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(order_number).await {
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        order = %order_number,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Accrual request failed, retrying"
                    );
                    sleep(self.retry_wait).await;
                }
                result => {
                    debug!(order = %order_number, attempts = attempt + 1, "Accrual request finished");
                    return result;
                }
            }
        }
    }
}
