//! Persistence for appointments and orders
//!
//! [`PostgrestStore`] talks to the hosted database; [`InMemoryStore`] backs
//! tests and local runs without database credentials.

mod memory;
mod postgrest;

pub use memory::InMemoryStore;
pub use postgrest::PostgrestStore;

use crate::Result;
use crate::types::{Appointment, Order};
use std::future::Future;
use uuid::Uuid;

pub trait AppointmentStore {
    fn find_appointment(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Appointment>>> + Send;

    /// Most recently created `pending_payment` appointment for the pair
    fn find_latest_pending(
        &self,
        email: &str,
        service_type: &str,
    ) -> impl Future<Output = Result<Option<Appointment>>> + Send;

    /// Move `id` to `confirmed` only if it is still `pending_payment`.
    /// Returns whether this call made the transition.
    fn confirm_if_pending(&self, id: Uuid) -> impl Future<Output = Result<bool>> + Send;
}

pub trait OrderStore {
    fn insert_order(&self, order: &Order) -> impl Future<Output = Result<()>> + Send;

    fn orders_for_session(
        &self,
        payment_session_id: &str,
    ) -> impl Future<Output = Result<Vec<Order>>> + Send;
}
