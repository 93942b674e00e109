//! Webhook server for Facebook group notifications
//!
//! Routes:
//! - `GET /webhook`  verification handshake
//! - `POST /webhook` event delivery, always acknowledged with 200
//! - `GET /`         liveness probe

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api::FacebookApi;
use crate::error::{FacebookError, Result};
use crate::handler::{DispatchReport, EventDispatcher};

/// Body of every delivery acknowledgement
pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

/// Body of the liveness route
pub const LIVENESS_TEXT: &str = "Your bot server is running.";

/// Webhook server state
#[derive(Clone)]
pub struct WebhookState {
    pub api: Arc<FacebookApi>,
    pub dispatcher: Arc<EventDispatcher>,
    /// Acknowledge before dispatching instead of after
    pub async_dispatch: bool,
}

/// Verification query parameters
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Create webhook router
pub fn create_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn index() -> &'static str {
    LIVENESS_TEXT
}

/// Answer the verification handshake
///
/// A query string that does not parse is refused like a token mismatch.
async fn verify_webhook(
    State(state): State<Arc<WebhookState>>,
    query: std::result::Result<Query<VerifyParams>, QueryRejection>,
) -> Response {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            warn!("Webhook verification failed: {}", rejection.body_text());
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    match state.api.verify_webhook(
        params.mode.as_deref(),
        params.verify_token.as_deref(),
        params.challenge.as_deref(),
    ) {
        Ok(challenge) => (StatusCode::OK, challenge).into_response(),
        Err(_) => StatusCode::FORBIDDEN.into_response(),
    }
}

/// Handle incoming webhook delivery
async fn receive_webhook(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    debug!("Received webhook: {}", String::from_utf8_lossy(&body));

    if state.async_dispatch {
        let dispatcher = Arc::clone(&state.dispatcher);
        tokio::spawn(async move {
            let report = dispatcher.dispatch_body(&body).await;
            log_report(&report);
        });
    } else {
        let report = state.dispatcher.dispatch_body(&body).await;
        log_report(&report);
    }

    (StatusCode::OK, EVENT_RECEIVED)
}

fn log_report(report: &DispatchReport) {
    if report.is_group {
        info!(
            "Webhook processed: {} changes, {} answered, {} replies published",
            report.changes_seen,
            report.outcomes.len(),
            report.published()
        );
    }
}

/// Start webhook server, serving until `shutdown` resolves
pub async fn start_webhook_server<F>(state: WebhookState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_webhook_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FacebookError::Server(e.to_string()))?;

    info!("Server is listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| FacebookError::Server(e.to_string()))?;

    Ok(())
}
