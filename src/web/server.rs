//! Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use secrecy::SecretString;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::{OnboardingError, RetryError, ServerError, WebhookError};
use crate::monitor::{BatchRunReport, MonitoringScheduler};
use crate::onboarding::RetryService;
use crate::web::types::{HealthResponse, RetryBody};
use crate::webhook::{Ack, Reconciler, auth};

/// Shared state for all handlers.
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub retry: Arc<RetryService>,
    pub scheduler: Arc<MonitoringScheduler>,
    /// Batch knobs for manually triggered runs.
    pub batch: BatchConfig,
    /// Shared secret guarding the manual monitoring trigger.
    pub secret: Option<SecretString>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/webhooks/provider", post(webhook_handler))
        .route(
            "/api/workspaces/{workspace_id}/cases/{case_id}/retry",
            post(retry_handler),
        )
        .route("/api/monitoring/run", post(monitoring_run_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(2 * 1024 * 1024)),
        )
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
/// The server drains and exits once `shutdown` flips to `true`.
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::StartupFailed {
            reason: format!("Failed to bind to {}: {}", addr, e),
        })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ServerError::StartupFailed {
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                tracing::info!("HTTP server shutting down");
            })
            .await
        {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "HTTP server listening");
    Ok(bound_addr)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "jurisync",
    })
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, (StatusCode, String)> {
    state
        .reconciler
        .handle(&body, authorization(&headers))
        .await
        .map(Json)
        .map_err(|e| {
            let status = webhook_error_status(&e);
            if status.is_server_error() {
                tracing::error!("Webhook processing failed: {}", e);
            }
            (status, e.to_string())
        })
}

/// HTTP status for a rejected or failed webhook.
pub fn webhook_error_status(err: &WebhookError) -> StatusCode {
    match err {
        WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
        WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        WebhookError::Reconciliation(OnboardingError::Transition(_)) => StatusCode::CONFLICT,
        WebhookError::Reconciliation(_) | WebhookError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn retry_handler(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, case_id)): Path<(String, Uuid)>,
) -> Result<Json<RetryBody>, (StatusCode, String)> {
    match state.retry.retry(&workspace_id, case_id).await {
        Ok(response) => Ok(Json(response.into())),
        Err(e) => {
            let status = retry_error_status(&e);
            if status.is_server_error() {
                tracing::warn!(case_id = %case_id, workspace_id = %workspace_id, "Retry failed: {}", e);
            }
            Err((status, e.user_message()))
        }
    }
}

/// HTTP status for a failed retry.
pub fn retry_error_status(err: &RetryError) -> StatusCode {
    match err {
        RetryError::CaseNotFound(_) => StatusCode::NOT_FOUND,
        RetryError::NotEligible(_) => StatusCode::CONFLICT,
        RetryError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        RetryError::Onboarding(OnboardingError::Database(_)) | RetryError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        RetryError::Onboarding(OnboardingError::Transition(_)) => StatusCode::CONFLICT,
        RetryError::Onboarding(_) | RetryError::Credits(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn monitoring_run_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BatchRunReport>, (StatusCode, String)> {
    auth::verify(state.secret.as_ref(), authorization(&headers))
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

    state
        .scheduler
        .run_daily_check(&state.batch)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Manual monitoring run failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}
