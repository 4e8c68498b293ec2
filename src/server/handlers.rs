use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;

use crate::Error;
use crate::security::SecurityGuard;
use crate::store::{AppointmentStore, OrderStore};
use crate::webhook::{PaymentReconciler, SIGNATURE_HEADER};

use super::types::*;

pub type AppState<S> = Arc<ServerState<S>>;

pub struct ServerState<S> {
    pub reconciler: PaymentReconciler<S>,
    pub guard: SecurityGuard,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: &Error) -> ApiError {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// First hop of the forwarding chain, or "unknown"
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn payment_webhook<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError>
where
    S: AppointmentStore + OrderStore + Send + Sync,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.reconciler.handle(signature, &body).await {
        Ok(outcome) => {
            tracing::debug!("📬 Webhook processed: {}", outcome.as_str());
            Ok(Json(WebhookAck { received: true }))
        }
        Err(e) => {
            if e.is_client_error() {
                tracing::warn!("⚠️  Webhook rejected: {}", e);
            } else {
                tracing::error!("❌ Webhook processing failed: {}", e);
            }
            Err(error_response(&e))
        }
    }
}

pub async fn analyze_input<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(mut request): Json<AnalyzeRequest>,
) -> Json<AnalyzeResponse>
where
    S: Send + Sync,
{
    // History and rate signals are keyed by ip, so callers cannot pick it
    request.context.ip = Some(client_ip(&headers));

    let (analysis, response) = state.guard.analyze(&request.input, &request.context);
    Json(AnalyzeResponse { analysis, response })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationOutbox;
    use crate::security::ManualClock;
    use crate::security::threat_detection::ThreatContext;
    use crate::store::InMemoryStore;
    use axum::http::HeaderValue;

    fn state() -> AppState<InMemoryStore> {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let guard = SecurityGuard::for_testing(clock.clone());
        let reconciler = PaymentReconciler::new(
            Arc::new(InMemoryStore::new()),
            None,
            Arc::new(NotificationOutbox::new(clock)),
            guard.events().clone(),
        );
        Arc::new(ServerState { reconciler, guard })
    }

    #[tokio::test]
    async fn test_analyze_keys_history_by_request_ip() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));

        let request = AnalyzeRequest {
            input: "<script>alert(1)</script>".to_string(),
            context: ThreatContext::from_ip("198.51.100.77"),
        };
        let Json(result) = analyze_input(State(state.clone()), headers, Json(request)).await;
        assert!(result.analysis.has_threat("Cross-Site Scripting Attempt"));

        let history = state.guard.detector().history();
        assert!(history.get("xss_attempt_203.0.113.9").is_some());
        assert!(history.get("xss_attempt_198.51.100.77").is_none());
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers), "10.0.0.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_response(&Error::signature("bad")).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&Error::validation("customer_email")).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&Error::storage("down")).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
