//! # Persisted records touched by the payment flow
//!
//! Appointments and orders live in the hosted database. This crate never
//! creates appointments; it only reads them and moves them from
//! `pending_payment` to `confirmed` when a matching payment arrives. Orders
//! are inserted once per successful reconciliation and never modified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Appointment status as stored in the `appointments.status` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    /// Column value used in database filters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only `pending_payment -> confirmed` is driven by payments
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (Self::PendingPayment, AppointmentStatus::Confirmed)
        )
    }
}

/// A booking request made through the site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub email: String,
    pub client_name: Option<String>,
    pub service_type: String,
    pub service_name: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    /// New `pending_payment` appointment, mostly useful for seeding stores
    pub fn pending(email: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            client_name: None,
            service_type: service_type.into(),
            service_name: None,
            scheduled_for: None,
            status: AppointmentStatus::PendingPayment,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending_payment(&self) -> bool {
        self.status == AppointmentStatus::PendingPayment
    }

    /// Human-readable service label, falling back to the service type slug
    pub fn display_service(&self) -> String {
        match &self.service_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self
                .service_type
                .split(['_', '-'])
                .filter(|word| !word.is_empty())
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Record of a completed payment, written once per reconciled event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub payment_session_id: String,
    /// Amount in the currency's minor units (cents)
    pub amount_total: i64,
    pub currency: String,
    pub customer_email: String,
    /// Snapshot of the payment session metadata at reconciliation time
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(AppointmentStatus::PendingPayment.can_transition_to(AppointmentStatus::Confirmed));
        assert!(!AppointmentStatus::Confirmed.can_transition_to(AppointmentStatus::Confirmed));
        assert!(!AppointmentStatus::Cancelled.can_transition_to(AppointmentStatus::Confirmed));
        assert!(!AppointmentStatus::PendingPayment.can_transition_to(AppointmentStatus::Cancelled));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&AppointmentStatus::PendingPayment).unwrap();
        assert_eq!(json, "\"pending_payment\"");
        assert_eq!(AppointmentStatus::Confirmed.as_str(), "confirmed");
    }

    #[test]
    fn test_display_service() {
        let mut appointment = Appointment::pending("client@example.com", "couples_therapy");
        assert_eq!(appointment.display_service(), "Couples Therapy");

        appointment.service_name = Some("Couples Therapy (50 min)".to_string());
        assert_eq!(appointment.display_service(), "Couples Therapy (50 min)");
    }
}
