//! HTTP API exercised over a real socket.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::watch;

use common::{FakeGateway, Harness, SAMPLE_CNJ, WORKSPACE};
use jurisync::config::{BatchConfig, OnboardingConfig, WebhookConfig};
use jurisync::credits::{CreditGate, InMemoryLedger};
use jurisync::lifecycle::{CaseMetadata, CaseStatus};
use jurisync::monitor::MonitoringScheduler;
use jurisync::onboarding::RetryService;
use jurisync::web::{AppState, start_server};
use jurisync::webhook::Reconciler;

const SECRET: &str = "api-secret";

struct TestServer {
    base: String,
    client: reqwest::Client,
    _shutdown: watch::Sender<bool>,
}

async fn serve(harness: &Harness, credits: Arc<dyn CreditGate>) -> TestServer {
    let secret = Some(SecretString::from(SECRET.to_string()));
    let state = Arc::new(AppState {
        reconciler: Arc::new(Reconciler::new(
            Arc::clone(&harness.db),
            Arc::clone(&harness.orchestrator),
            &WebhookConfig {
                secret: secret.clone(),
                ack_timeout: Duration::from_secs(5),
            },
        )),
        retry: Arc::new(RetryService::new(
            Arc::clone(&harness.db),
            credits,
            Arc::clone(&harness.orchestrator),
            OnboardingConfig::default(),
        )),
        scheduler: Arc::new(MonitoringScheduler::new(
            Arc::clone(&harness.db),
            harness.dyn_gateway(),
        )),
        batch: BatchConfig {
            batch_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..BatchConfig::default()
        },
        secret,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    let bound = start_server(addr, state, shutdown_rx)
        .await
        .expect("server starts");

    TestServer {
        base: format!("http://{bound}"),
        client: reqwest::Client::new(),
        _shutdown: shutdown_tx,
    }
}

fn funded() -> Arc<dyn CreditGate> {
    Arc::new(InMemoryLedger::new().with_balance(WORKSPACE, 10))
}

#[tokio::test]
async fn health_endpoint_answers() {
    let harness = Harness::new(FakeGateway::new());
    let server = serve(&harness, funded()).await;

    let response = server
        .client
        .get(format!("{}/api/health", server.base))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn webhook_endpoint_acks_and_activates() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let server = serve(&harness, funded()).await;

    let response = server
        .client
        .post(format!("{}/api/webhooks/provider", server.base))
        .bearer_auth(SECRET)
        .json(&json!({
            "event": "process_update_completed",
            "cnj": SAMPLE_CNJ,
            "status": "success"
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"]["kind"], "activated");
    assert_eq!(harness.reload(&case).await.status, CaseStatus::Active);
}

#[tokio::test]
async fn webhook_endpoint_rejects_bad_secret_and_bad_body() {
    let harness = Harness::new(FakeGateway::new());
    let server = serve(&harness, funded()).await;
    let url = format!("{}/api/webhooks/provider", server.base);

    let unauthorized = server
        .client
        .post(&url)
        .header("Authorization", "wrong")
        .body("{}")
        .send()
        .await
        .expect("request");
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

    let malformed = server
        .client
        .post(&url)
        .bearer_auth(SECRET)
        .body("{\"event\":")
        .send()
        .await
        .expect("request");
    assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn retry_endpoint_maps_outcomes_to_statuses() {
    let harness = Harness::new(FakeGateway::new());
    let errored = harness.case(CaseStatus::Error, CaseMetadata::default()).await;
    let locked = harness
        .case(
            CaseStatus::Error,
            CaseMetadata {
                can_retry: false,
                ..CaseMetadata::default()
            },
        )
        .await;
    let server = serve(&harness, funded()).await;
    let url = |id: uuid::Uuid| {
        format!(
            "{}/api/workspaces/{}/cases/{}/retry",
            server.base, WORKSPACE, id
        )
    };

    let ok = server
        .client
        .post(url(errored.id))
        .send()
        .await
        .expect("request");
    assert_eq!(ok.status(), reqwest::StatusCode::OK);
    let body: Value = ok.json().await.expect("json");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["case"]["status"], "ACTIVE");

    let conflict = server
        .client
        .post(url(locked.id))
        .send()
        .await
        .expect("request");
    assert_eq!(conflict.status(), reqwest::StatusCode::CONFLICT);
    let reason = conflict.text().await.expect("text");
    assert!(reason.contains("not eligible"));

    let missing = server
        .client
        .post(url(uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retry_endpoint_reports_missing_credits() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Error, CaseMetadata::default()).await;
    let server = serve(&harness, Arc::new(InMemoryLedger::new())).await;

    let response = server
        .client
        .post(format!(
            "{}/api/workspaces/{}/cases/{}/retry",
            server.base, WORKSPACE, case.id
        ))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::PAYMENT_REQUIRED);
    assert_eq!(harness.reload(&case).await.status, CaseStatus::Error);
}

#[tokio::test]
async fn manual_monitoring_run_returns_report() {
    let harness = Harness::new(FakeGateway::new());
    let server = serve(&harness, funded()).await;
    let url = format!("{}/api/monitoring/run", server.base);

    let denied = server.client.post(&url).send().await.expect("request");
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .post(&url)
        .bearer_auth(SECRET)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["total"], 0);
}
