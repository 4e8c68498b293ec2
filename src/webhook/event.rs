//! Payment provider event payloads

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The only event type that changes appointment state
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }

    /// Parse the event object as a checkout session
    pub fn checkout_session(&self) -> Result<CheckoutSession> {
        Ok(serde_json::from_value(self.data.object.clone())?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A completed checkout session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    /// Minor currency units
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

impl CheckoutSession {
    /// Customer email, preferring the address collected at checkout
    pub fn email(&self) -> Option<&str> {
        let present = |email: &&str| !email.trim().is_empty();

        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .filter(present)
            .or_else(|| self.customer_email.as_deref().filter(present))
    }

    pub fn require_email(&self) -> Result<&str> {
        self.email()
            .ok_or_else(|| Error::validation("customer_email"))
    }

    pub fn service_type(&self) -> Option<&str> {
        self.metadata.get("service_type").map(String::as_str)
    }

    pub fn appointment_id(&self) -> Option<uuid::Uuid> {
        self.metadata
            .get("appointment_id")
            .and_then(|id| uuid::Uuid::parse_str(id).ok())
    }

    /// Transaction id shown to clients, the payment intent when present
    pub fn transaction_id(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}
