pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::security::SecurityGuard;
use crate::store::{AppointmentStore, OrderStore};
use crate::webhook::PaymentReconciler;

use handlers::{AppState, ServerState};

pub fn create_router<S>(reconciler: PaymentReconciler<S>, guard: SecurityGuard) -> Router
where
    S: AppointmentStore + OrderStore + Send + Sync + 'static,
{
    let state: AppState<S> = Arc::new(ServerState { reconciler, guard });

    Router::new()
        .route("/api/webhooks/payment", post(handlers::payment_webhook::<S>))
        .route("/api/security/analyze", post(handlers::analyze_input::<S>))
        .route("/health", get(handlers::health))
        .with_state(state)
}
