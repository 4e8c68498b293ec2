//! Payment webhook reconciliation
//!
//! A completed checkout confirms the matching `pending_payment` appointment,
//! records an order and queues the confirmation emails. Matching prefers the
//! appointment id carried in the session metadata, provided it belongs to the
//! paying customer, and otherwise falls back to the latest pending
//! appointment for the customer's email and service type.

use super::event::{CheckoutSession, WebhookEvent};
use super::signature::SignatureVerifier;
use crate::config::PaymentConfig;
use crate::notifications::NotificationOutbox;
use crate::security::clock::Clock;
use crate::security::events::{SecurityEvent, SecurityEventLog};
use crate::store::{AppointmentStore, OrderStore};
use crate::types::{Appointment, AppointmentStatus, Order};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Confirmed {
        appointment_id: Uuid,
        order_id: Uuid,
        order_recorded: bool,
    },
    /// Nothing pending matched; acknowledged without a state change
    NoMatch,
    /// Event type this service does not act on
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } => "confirmed",
            Self::NoMatch => "no_match",
            Self::Ignored { .. } => "ignored",
        }
    }
}

pub struct PaymentReconciler<S> {
    store: Arc<S>,
    verifier: Option<SignatureVerifier>,
    outbox: Arc<NotificationOutbox>,
    events: Arc<SecurityEventLog>,
}

impl<S> PaymentReconciler<S>
where
    S: AppointmentStore + OrderStore + Send + Sync,
{
    pub fn new(
        store: Arc<S>,
        verifier: Option<SignatureVerifier>,
        outbox: Arc<NotificationOutbox>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self {
            store,
            verifier,
            outbox,
            events,
        }
    }

    pub fn from_config(
        store: Arc<S>,
        config: &PaymentConfig,
        outbox: Arc<NotificationOutbox>,
        events: Arc<SecurityEventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let verifier = match &config.webhook_secret {
            Some(secret) => Some(SignatureVerifier::new(
                secret.clone(),
                Duration::from_secs(config.signature_tolerance_seconds),
                clock,
            )),
            None => {
                tracing::warn!(
                    "⚠️  PAYMENT_WEBHOOK_SECRET not set; webhook payloads will be accepted unverified"
                );
                None
            }
        };

        Self::new(store, verifier, outbox, events)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Verify the signature when a secret is configured
    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<()> {
        let Some(verifier) = &self.verifier else {
            tracing::warn!("⚠️  Accepting unsigned webhook payload");
            return Ok(());
        };

        verifier.verify(signature, body).inspect_err(|e| {
            self.events.record(SecurityEvent::WebhookSignatureRejected {
                reason: e.to_string(),
                timestamp: self.events.now_millis(),
            });
        })
    }

    /// Verify, parse and reconcile one raw delivery
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> Result<ReconcileOutcome> {
        self.verify(signature, body)?;
        let event = WebhookEvent::from_slice(body)?;
        self.reconcile(&event).await
    }

    pub async fn reconcile(&self, event: &WebhookEvent) -> Result<ReconcileOutcome> {
        if !event.is_checkout_completed() {
            tracing::debug!("⏭️  Ignoring webhook event {} ({})", event.id, event.event_type);
            let outcome = ReconcileOutcome::Ignored {
                event_type: event.event_type.clone(),
            };
            self.record(event, None, &outcome);
            return Ok(outcome);
        }

        let session = event.checkout_session()?;
        let email = session.require_email()?;

        if !self.store.orders_for_session(&session.id).await?.is_empty() {
            tracing::info!(
                "🔁 Payment session {} was already reconciled; acknowledging",
                session.id
            );
            self.record(event, None, &ReconcileOutcome::NoMatch);
            return Ok(ReconcileOutcome::NoMatch);
        }

        let Some(mut appointment) = self.find_match(&session, email).await? else {
            tracing::info!(
                "🔍 No pending appointment for session {} ({}); acknowledging",
                session.id,
                email
            );
            self.record(event, None, &ReconcileOutcome::NoMatch);
            return Ok(ReconcileOutcome::NoMatch);
        };

        if !self.store.confirm_if_pending(appointment.id).await? {
            tracing::info!(
                "🔁 Appointment {} was already confirmed by another delivery",
                appointment.id
            );
            self.record(event, Some(appointment.id), &ReconcileOutcome::NoMatch);
            return Ok(ReconcileOutcome::NoMatch);
        }
        appointment.status = AppointmentStatus::Confirmed;

        tracing::info!(
            "✅ Appointment {} confirmed by payment session {}",
            appointment.id,
            session.id
        );

        let order = build_order(&appointment, &session, email);
        let order_recorded = match self.store.insert_order(&order).await {
            Ok(()) => true,
            Err(e) => {
                // The confirmation stands; the order row can be backfilled
                tracing::error!(
                    "❌ Failed to record order for appointment {} (session {}): {}",
                    appointment.id,
                    session.id,
                    e
                );
                false
            }
        };

        self.outbox.enqueue_booking_confirmed(&appointment, &order);

        let outcome = ReconcileOutcome::Confirmed {
            appointment_id: appointment.id,
            order_id: order.id,
            order_recorded,
        };
        self.record(event, Some(appointment.id), &outcome);
        Ok(outcome)
    }

    /// The id named in the session metadata is trusted only when that
    /// appointment belongs to the paying customer and is still awaiting
    /// payment. Anything else falls back to the (email, service_type) lookup.
    async fn find_match(&self, session: &CheckoutSession, email: &str) -> Result<Option<Appointment>> {
        let service_type = session.service_type();

        if let Some(id) = session.appointment_id() {
            match self.store.find_appointment(id).await? {
                Some(appointment) if !belongs_to(&appointment, email, service_type) => {
                    tracing::warn!(
                        "⚠️  Session {} names appointment {} of another customer or service; ignoring the id",
                        session.id,
                        id
                    );
                }
                Some(appointment)
                    if appointment
                        .status
                        .can_transition_to(AppointmentStatus::Confirmed) =>
                {
                    return Ok(Some(appointment));
                }
                Some(appointment) => {
                    tracing::debug!(
                        "Appointment {} named by session {} is {}",
                        id,
                        session.id,
                        appointment.status.as_str()
                    );
                }
                None => {
                    tracing::warn!("⚠️  Session {} names unknown appointment {}", session.id, id);
                }
            }
        }

        let Some(service_type) = service_type else {
            tracing::warn!("⚠️  Session {} carries no service_type metadata", session.id);
            return Ok(None);
        };

        self.store.find_latest_pending(email, service_type).await
    }

    fn record(&self, event: &WebhookEvent, appointment_id: Option<Uuid>, outcome: &ReconcileOutcome) {
        self.events.record(SecurityEvent::WebhookReconciled {
            event_id: event.id.clone(),
            appointment_id: appointment_id.map(|id| id.to_string()),
            outcome: outcome.as_str().to_string(),
            timestamp: self.events.now_millis(),
        });
    }
}

fn belongs_to(appointment: &Appointment, email: &str, service_type: Option<&str>) -> bool {
    appointment.email.trim().eq_ignore_ascii_case(email.trim())
        && service_type.is_none_or(|service| service == appointment.service_type)
}

fn build_order(appointment: &Appointment, session: &CheckoutSession, email: &str) -> Order {
    let mut metadata = session.metadata.clone();
    if let Some(intent) = &session.payment_intent {
        metadata
            .entry("payment_intent".to_string())
            .or_insert_with(|| intent.clone());
    }

    Order {
        id: Uuid::new_v4(),
        appointment_id: appointment.id,
        payment_session_id: session.id.clone(),
        amount_total: session.amount_total.unwrap_or(0),
        currency: session.currency.clone().unwrap_or_else(|| "usd".to_string()),
        customer_email: email.to_string(),
        metadata,
        created_at: Utc::now(),
    }
}
