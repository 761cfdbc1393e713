mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::{fast_poller_config, test_ledger};
use loyalty_ledger::accrual::{
    AccrualAuthority, AccrualError, AuthorityReply, HttpAccrualClient, ReconciliationPoller,
};
use loyalty_ledger::config::PollerConfig;
use loyalty_ledger::domain::OperationStatus;
use loyalty_ledger::storage::LedgerStore;
use tokio::sync::Mutex;

/// One scripted answer of the fake authority
#[derive(Clone)]
struct Canned {
    status: StatusCode,
    body: Option<String>,
    delay: Duration,
}

impl Canned {
    fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            delay: Duration::ZERO,
        }
    }

    fn json(order: &str, status: &str, accrual: Option<f64>) -> Self {
        let body = match accrual {
            Some(accrual) => serde_json::json!({"order": order, "status": status, "accrual": accrual}),
            None => serde_json::json!({"order": order, "status": status}),
        };
        Self {
            status: StatusCode::OK,
            body: Some(body.to_string()),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-process stand-in for the accrual authority.
///
/// Unscripted orders answer 204.
#[derive(Default)]
struct FakeAuthority {
    scripts: Mutex<HashMap<String, VecDeque<Canned>>>,
    hits: AtomicUsize,
}

impl FakeAuthority {
    async fn script(&self, order: &str, replies: Vec<Canned>) {
        self.scripts
            .lock()
            .await
            .insert(order.to_string(), replies.into());
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn get_order(
    State(fake): State<Arc<FakeAuthority>>,
    Path(number): Path<String>,
) -> Response {
    fake.hits.fetch_add(1, Ordering::SeqCst);
    let canned = fake
        .scripts
        .lock()
        .await
        .get_mut(&number)
        .and_then(|queue| queue.pop_front());

    let Some(canned) = canned else {
        return StatusCode::NO_CONTENT.into_response();
    };
    tokio::time::sleep(canned.delay).await;
    match canned.body {
        Some(body) => (
            canned.status,
            [("content-type", "application/json")],
            body,
        )
            .into_response(),
        None => canned.status.into_response(),
    }
}

/// Start the fake on an ephemeral port and return its base URL.
async fn spawn_authority(fake: Arc<FakeAuthority>) -> Result<String> {
    let app = Router::new()
        .route("/api/orders/:number", get(get_order))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{}", addr))
}

async fn client_for(fake: &Arc<FakeAuthority>) -> Result<HttpAccrualClient> {
    let base_url = spawn_authority(fake.clone()).await?;
    Ok(HttpAccrualClient::new(base_url, &fast_poller_config()))
}

#[tokio::test]
async fn test_processed_reply_carries_accrual() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![Canned::json("12345678903", "PROCESSED", Some(729.98))],
    )
    .await;
    let client = client_for(&fake).await?;

    let reply = client.fetch_order("12345678903").await?;
    assert_eq!(
        reply,
        AuthorityReply::Status {
            status: OperationStatus::Processed,
            accrual: 72998
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_intermediate_statuses_carry_no_accrual() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![
            Canned::json("12345678903", "REGISTERED", None),
            Canned::json("12345678903", "PROCESSING", Some(10.0)),
            Canned::json("12345678903", "INVALID", None),
        ],
    )
    .await;
    let client = client_for(&fake).await?;

    let expected = [
        OperationStatus::New,
        OperationStatus::Processing,
        OperationStatus::Invalid,
    ];
    for status in expected {
        assert_eq!(
            client.fetch_order("12345678903").await?,
            AuthorityReply::Status { status, accrual: 0 }
        );
    }

    Ok(())
}

#[tokio::test]
async fn test_no_content_means_not_registered() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    let client = client_for(&fake).await?;

    assert_eq!(
        client.fetch_order("79927398713").await?,
        AuthorityReply::NotRegistered
    );
    assert_eq!(fake.hits(), 1);

    Ok(())
}

#[tokio::test]
async fn test_rate_limit_is_retried() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![
            Canned::status(StatusCode::TOO_MANY_REQUESTS),
            Canned::status(StatusCode::SERVICE_UNAVAILABLE),
            Canned::json("12345678903", "PROCESSED", Some(500.0)),
        ],
    )
    .await;
    let client = client_for(&fake).await?;

    let reply = client.fetch_order("12345678903").await?;
    assert_eq!(
        reply,
        AuthorityReply::Status {
            status: OperationStatus::Processed,
            accrual: 50000
        }
    );
    assert_eq!(fake.hits(), 3);

    Ok(())
}

#[tokio::test]
async fn test_retries_are_bounded() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![Canned::status(StatusCode::INTERNAL_SERVER_ERROR); 5],
    )
    .await;
    let client = client_for(&fake).await?;

    let result = client.fetch_order("12345678903").await;
    assert_eq!(result, Err(AccrualError::Server(500)));
    // One attempt plus max_retries (2)
    assert_eq!(fake.hits(), 3);

    Ok(())
}

#[tokio::test]
async fn test_hard_failures_are_not_retried() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script("12345678903", vec![Canned::status(StatusCode::NOT_FOUND)])
        .await;
    fake.script(
        "79927398713",
        vec![Canned::json("79927398713", "CANCELLED", None)],
    )
    .await;
    let client = client_for(&fake).await?;

    assert_eq!(
        client.fetch_order("12345678903").await,
        Err(AccrualError::UnexpectedStatus(404))
    );
    assert_eq!(
        client.fetch_order("79927398713").await,
        Err(AccrualError::UnknownStatus("CANCELLED".into()))
    );
    assert_eq!(fake.hits(), 2);

    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_error() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![Canned {
            status: StatusCode::OK,
            body: Some("not json".into()),
            delay: Duration::ZERO,
        }],
    )
    .await;
    let client = client_for(&fake).await?;

    assert!(matches!(
        client.fetch_order("12345678903").await,
        Err(AccrualError::Decode(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_out_of_range_accrual_is_a_decode_error() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![Canned::json("12345678903", "PROCESSED", Some(1e17))],
    )
    .await;
    let client = client_for(&fake).await?;

    assert!(matches!(
        client.fetch_order("12345678903").await,
        Err(AccrualError::Decode(_))
    ));
    assert_eq!(fake.hits(), 1);

    Ok(())
}

#[tokio::test]
async fn test_slow_authority_times_out() -> Result<()> {
    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![Canned::json("12345678903", "PROCESSED", Some(1.0)).delayed(Duration::from_millis(500))],
    )
    .await;
    let base_url = spawn_authority(fake.clone()).await?;
    let config = PollerConfig {
        request_timeout: Duration::from_millis(50),
        max_retries: 0,
        ..PollerConfig::default()
    };
    let client = HttpAccrualClient::new(base_url, &config);

    assert_eq!(
        client.fetch_order("12345678903").await,
        Err(AccrualError::Timeout(Duration::from_millis(50)))
    );

    Ok(())
}

#[tokio::test]
async fn test_unreachable_authority_is_a_transport_error() -> Result<()> {
    // Grab a free port, then release it so nothing is listening there
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = HttpAccrualClient::new(format!("http://{}", addr), &fast_poller_config());
    let result = client.fetch_order("12345678903").await;
    assert!(matches!(result, Err(AccrualError::Transport(_))));

    Ok(())
}

#[tokio::test]
async fn test_poller_against_http_authority() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    ledger.record_accrual_claim(1, "12345678903").await?;
    ledger.record_accrual_claim(2, "79927398713").await?;

    let fake = Arc::new(FakeAuthority::default());
    fake.script(
        "12345678903",
        vec![
            Canned::status(StatusCode::TOO_MANY_REQUESTS),
            Canned::json("12345678903", "PROCESSED", Some(500.0)),
        ],
    )
    .await;
    let client = Arc::new(client_for(&fake).await?);
    let poller = ReconciliationPoller::new(ledger.clone(), client, fast_poller_config());

    let report = poller.tick().await?;
    assert_eq!(report.checked, 2);
    assert_eq!(report.applied, 1);
    assert_eq!(report.deferred, 1);

    assert_eq!(ledger.current_balance(1).await?.current, 50000);
    let pending = ledger.list_pending().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].order_number, "79927398713");

    Ok(())
}
