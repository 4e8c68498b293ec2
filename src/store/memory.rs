use super::{AppointmentStore, OrderStore};
use crate::types::{Appointment, AppointmentStatus, Order};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Process-local store with switchable failures for tests
#[derive(Default)]
pub struct InMemoryStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    orders: RwLock<Vec<Order>>,
    fail_reads: AtomicBool,
    fail_updates: AtomicBool,
    fail_order_inserts: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_appointments(appointments: impl IntoIterator<Item = Appointment>) -> Self {
        let store = Self::new();
        for appointment in appointments {
            store.insert_appointment(appointment);
        }
        store
    }

    pub fn insert_appointment(&self, appointment: Appointment) {
        self.appointments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(appointment.id, appointment);
    }

    pub fn appointment(&self, id: Uuid) -> Option<Appointment> {
        self.appointments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_order_inserts(&self, fail: bool) {
        self.fail_order_inserts.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::storage("appointment lookup unavailable"));
        }
        Ok(())
    }
}

impl AppointmentStore for InMemoryStore {
    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        self.check_reads()?;
        Ok(self.appointment(id))
    }

    async fn find_latest_pending(
        &self,
        email: &str,
        service_type: &str,
    ) -> Result<Option<Appointment>> {
        self.check_reads()?;

        let appointments = self
            .appointments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(appointments
            .values()
            .filter(|a| {
                a.is_pending_payment()
                    && a.email.eq_ignore_ascii_case(email)
                    && a.service_type == service_type
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn confirm_if_pending(&self, id: Uuid) -> Result<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::storage("appointment update unavailable"));
        }

        let mut appointments = self
            .appointments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match appointments.get_mut(&id) {
            Some(appointment) if appointment.is_pending_payment() => {
                appointment.status = AppointmentStatus::Confirmed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        if self.fail_order_inserts.load(Ordering::SeqCst) {
            return Err(Error::storage("order insert unavailable"));
        }

        self.orders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(order.clone());
        Ok(())
    }

    async fn orders_for_session(&self, payment_session_id: &str) -> Result<Vec<Order>> {
        self.check_reads()?;

        Ok(self
            .orders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|order| order.payment_session_id == payment_session_id)
            .cloned()
            .collect())
    }
}
