//! Provider callbacks resolving ONBOARDING cases.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;

use common::{FakeGateway, Harness, SAMPLE_CNJ, WORKSPACE};
use jurisync::config::WebhookConfig;
use jurisync::db::{ProcessoStore, WorkspaceStore};
use jurisync::error::WebhookError;
use jurisync::lifecycle::{CaseMetadata, CaseStatus};
use jurisync::onboarding::OnboardingMode;
use jurisync::webhook::{AckOutcome, Reconciler};

const SECRET: &str = "hook-secret";
const AUTH: Option<&str> = Some("Bearer hook-secret");

fn reconciler(harness: &Harness, ack_timeout: Duration) -> Reconciler {
    Reconciler::new(
        Arc::clone(&harness.db),
        Arc::clone(&harness.orchestrator),
        &WebhookConfig {
            secret: Some(SecretString::from(SECRET.to_string())),
            ack_timeout,
        },
    )
}

fn completed(status: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": "process_update_completed",
        "numero_cnj": SAMPLE_CNJ,
        "status": status,
        "processo": { "numero_cnj": SAMPLE_CNJ, "classe": "Procedimento Comum Cível" }
    }))
    .expect("serialize")
}

#[tokio::test]
async fn success_callback_activates_case_once_across_redeliveries() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let first = reconciler.handle(&completed("sucesso"), AUTH).await.expect("ack");
    assert_eq!(first.outcome, AckOutcome::Activated { case_id: case.id });
    assert!(first.received);

    let second = reconciler.handle(&completed("sucesso"), AUTH).await.expect("ack");
    assert_eq!(second.outcome, AckOutcome::NoMatchingCase);

    let case = harness.reload(&case).await;
    assert_eq!(case.status, CaseStatus::Active);
    let processo = harness
        .db
        .get_processo_by_cnj(SAMPLE_CNJ)
        .await
        .expect("query")
        .expect("processo");
    assert_eq!(case.processo_id, Some(processo.id));
    assert_eq!(processo.dados_completos.payload["classe"], "Procedimento Comum Cível");
    assert_eq!(
        harness.db.get_process_count(WORKSPACE).await.expect("count"),
        1
    );
    // The process body came with the callback.
    assert_eq!(
        harness
            .gateway
            .process_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn async_onboarding_of_case_without_cnj_is_completed_by_the_callback() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness
        .case_tracking(CaseStatus::Unassigned, None, CaseMetadata::default())
        .await;

    let mut request = harness.orchestrator.request(SAMPLE_CNJ, WORKSPACE);
    request.target_case_id = Some(case.id);
    request.mode = OnboardingMode::Async;
    harness.orchestrator.onboard(request).await.expect("onboard");

    let waiting = harness.reload(&case).await;
    assert_eq!(waiting.status, CaseStatus::Onboarding);
    assert_eq!(waiting.detected_cnj.as_deref(), Some(SAMPLE_CNJ));

    let ack = reconciler(&harness, Duration::from_secs(5))
        .handle(&completed("sucesso"), AUTH)
        .await
        .expect("ack");
    assert_eq!(ack.outcome, AckOutcome::Activated { case_id: case.id });
    assert_eq!(harness.reload(&case).await.status, CaseStatus::Active);
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_apply_once() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));
    let payload = completed("success");

    let (a, b) = tokio::join!(
        reconciler.handle(&payload, AUTH),
        reconciler.handle(&payload, AUTH)
    );
    let outcomes = [a.expect("ack").outcome, b.expect("ack").outcome];

    let activated = outcomes
        .iter()
        .filter(|o| matches!(o, AckOutcome::Activated { .. }))
        .count();
    assert_eq!(activated, 1);
    assert_eq!(harness.reload(&case).await.status, CaseStatus::Active);
    assert_eq!(
        harness.db.get_process_count(WORKSPACE).await.expect("count"),
        1
    );
}

#[tokio::test]
async fn failure_callback_moves_case_to_error() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let payload = serde_json::to_vec(&json!({
        "evento": "atualizacao_processo_concluida",
        "numero_cnj": SAMPLE_CNJ,
        "status": "erro",
        "motivo": "tribunal indisponível"
    }))
    .expect("serialize");
    let ack = reconciler.handle(&payload, AUTH).await.expect("ack");

    assert_eq!(ack.outcome, AckOutcome::Failed { case_id: case.id });
    let case = harness.reload(&case).await;
    assert_eq!(case.status, CaseStatus::Error);
    assert_eq!(case.metadata.last_error.as_deref(), Some("tribunal indisponível"));
    assert_eq!(
        harness.db.get_process_count(WORKSPACE).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn callback_without_onboarding_case_is_a_no_op() {
    let harness = Harness::new(FakeGateway::new());
    let active = harness.case(CaseStatus::Active, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let ack = reconciler.handle(&completed("sucesso"), AUTH).await.expect("ack");

    assert_eq!(ack.outcome, AckOutcome::NoMatchingCase);
    assert_eq!(ack.cnj.as_deref(), Some(SAMPLE_CNJ));
    assert_eq!(harness.reload(&active).await, active);
    assert!(
        harness
            .db
            .get_processo_by_cnj(SAMPLE_CNJ)
            .await
            .expect("query")
            .is_none()
    );
}

#[tokio::test]
async fn missing_process_body_is_fetched_from_provider() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let payload = serde_json::to_vec(&json!({
        "event": "process_found",
        "cnj": SAMPLE_CNJ
    }))
    .expect("serialize");
    let ack = reconciler.handle(&payload, AUTH).await.expect("ack");

    assert_eq!(ack.outcome, AckOutcome::Activated { case_id: case.id });
    assert_eq!(
        harness
            .gateway
            .process_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn slow_enrichment_is_acked_as_deferred_and_finishes_later() {
    let gateway = FakeGateway::new();
    gateway.slow_movements(Duration::from_millis(200));
    let harness = Harness::new(gateway);
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_millis(20));

    let ack = reconciler.handle(&completed("sucesso"), AUTH).await.expect("ack");
    assert_eq!(ack.outcome, AckOutcome::Deferred { case_id: case.id });

    let mut status = harness.reload(&case).await.status;
    for _ in 0..200 {
        if status == CaseStatus::Active {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = harness.reload(&case).await.status;
    }
    assert_eq!(status, CaseStatus::Active);
}

#[tokio::test]
async fn new_movement_notice_does_not_touch_cases() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let payload = serde_json::to_vec(&json!({
        "event": "nova_movimentacao",
        "numero": SAMPLE_CNJ
    }))
    .expect("serialize");
    let ack = reconciler.handle(&payload, AUTH).await.expect("ack");

    assert_eq!(ack.outcome, AckOutcome::MovementNoticed);
    assert_eq!(harness.reload(&case).await.status, CaseStatus::Onboarding);
}

#[tokio::test]
async fn unknown_event_is_acknowledged_and_ignored() {
    let harness = Harness::new(FakeGateway::new());
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let payload = br#"{"event":"billing_updated","cnj":"x"}"#;
    let ack = reconciler.handle(payload, AUTH).await.expect("ack");

    assert_eq!(
        ack.outcome,
        AckOutcome::Ignored {
            event: "billing_updated".to_string()
        }
    );
}

#[tokio::test]
async fn wrong_secret_is_unauthorized_and_mutates_nothing() {
    let harness = Harness::new(FakeGateway::new());
    let case = harness.case(CaseStatus::Onboarding, CaseMetadata::default()).await;
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let err = reconciler
        .handle(&completed("sucesso"), Some("Bearer nope"))
        .await
        .expect_err("rejected");
    assert!(matches!(err, WebhookError::Unauthorized));

    let err = reconciler
        .handle(&completed("sucesso"), None)
        .await
        .expect_err("rejected");
    assert!(matches!(err, WebhookError::Unauthorized));

    assert_eq!(harness.reload(&case).await.status, CaseStatus::Onboarding);
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let harness = Harness::new(FakeGateway::new());
    let reconciler = reconciler(&harness, Duration::from_secs(5));

    let payloads: [&[u8]; 4] = [
        b"not json",
        br#"{"cnj":"1234567-12.2023.8.09.0001"}"#,
        br#"{"event":"process_update_completed","cnj":"1234567-12.2023.8.09.0001","status":"maybe"}"#,
        br#"{"event":"process_found","cnj":"12-34"}"#,
    ];
    for raw in payloads {
        let err = reconciler.handle(raw, AUTH).await.expect_err("malformed");
        assert!(
            matches!(err, WebhookError::MalformedPayload(_)),
            "unexpected error for {}: {err}",
            String::from_utf8_lossy(raw)
        );
    }
}
