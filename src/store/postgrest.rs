use super::{AppointmentStore, OrderStore};
use crate::types::{Appointment, AppointmentStatus, Order};
use crate::{Result, storage_error};
use reqwest::{RequestBuilder, Response};
use uuid::Uuid;

const APPOINTMENTS: &str = "appointments";
const ORDERS: &str = "orders";

/// Client for the hosted database's REST interface
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl PostgrestStore {
    pub fn new(base_url: &str, service_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorized(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(storage_error!("{what} failed: HTTP {status}: {body}"));
        }

        Ok(response)
    }

    async fn first_appointment(&self, request: RequestBuilder, what: &str) -> Result<Option<Appointment>> {
        let rows = self
            .send(request, what)
            .await?
            .json::<Vec<Appointment>>()
            .await?;
        Ok(rows.into_iter().next())
    }
}

impl AppointmentStore for PostgrestStore {
    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        let request = self
            .client
            .get(self.table_url(APPOINTMENTS))
            .query(&[("id", format!("eq.{id}")), ("limit", "1".to_string())]);

        self.first_appointment(request, "appointment lookup").await
    }

    async fn find_latest_pending(
        &self,
        email: &str,
        service_type: &str,
    ) -> Result<Option<Appointment>> {
        let request = self
            .client
            .get(self.table_url(APPOINTMENTS))
            .query(&latest_pending_query(email, service_type));

        let found = self
            .first_appointment(request, "pending appointment lookup")
            .await?;

        Ok(found.filter(|appointment| appointment.email.eq_ignore_ascii_case(email)))
    }

    async fn confirm_if_pending(&self, id: Uuid) -> Result<bool> {
        // The status filter makes the update conditional; an empty
        // representation means another delivery got there first
        let request = self
            .client
            .patch(self.table_url(APPOINTMENTS))
            .query(&[
                ("id", format!("eq.{id}")),
                (
                    "status",
                    format!("eq.{}", AppointmentStatus::PendingPayment.as_str()),
                ),
            ])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "status": AppointmentStatus::Confirmed }));

        let updated = self
            .send(request, "appointment confirmation")
            .await?
            .json::<Vec<serde_json::Value>>()
            .await?;

        Ok(!updated.is_empty())
    }
}

impl OrderStore for PostgrestStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(ORDERS))
            .header("Prefer", "return=minimal")
            .json(order);

        self.send(request, "order insert").await?;
        Ok(())
    }

    async fn orders_for_session(&self, payment_session_id: &str) -> Result<Vec<Order>> {
        let request = self
            .client
            .get(self.table_url(ORDERS))
            .query(&[("payment_session_id", format!("eq.{payment_session_id}"))]);

        Ok(self
            .send(request, "order lookup")
            .await?
            .json::<Vec<Order>>()
            .await?)
    }
}

/// Query for the newest pending appointment of a customer and service.
/// The email goes through `ilike` for case-insensitivity, so its pattern
/// characters are escaped to match literally.
fn latest_pending_query(email: &str, service_type: &str) -> [(&'static str, String); 5] {
    [
        ("email", format!("ilike.{}", escape_like(email))),
        ("service_type", format!("eq.{service_type}")),
        (
            "status",
            format!("eq.{}", AppointmentStatus::PendingPayment.as_str()),
        ),
        ("order", "created_at.desc".to_string()),
        ("limit", "1".to_string()),
    ]
}

/// Escape `LIKE` wildcards, including PostgREST's `*` alias for `%`
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_' | '*') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_urls() {
        let store = PostgrestStore::new("https://db.example.com/", "service-key");
        assert_eq!(
            store.table_url(APPOINTMENTS),
            "https://db.example.com/rest/v1/appointments"
        );
        assert_eq!(store.table_url(ORDERS), "https://db.example.com/rest/v1/orders");
    }

    #[test]
    fn test_pending_lookup_escapes_wildcards() {
        let query = latest_pending_query("j_doe%*@x.com", "coaching");

        assert_eq!(query[0], ("email", r"ilike.j\_doe\%\*@x.com".to_string()));
        assert_eq!(query[1], ("service_type", "eq.coaching".to_string()));
        assert_eq!(query[2], ("status", "eq.pending_payment".to_string()));

        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("client@example.com"), "client@example.com");
    }

    #[tokio::test]
    async fn test_unreachable_database_is_an_error() {
        let store = PostgrestStore::new("http://127.0.0.1:9", "service-key");
        assert!(store.find_appointment(Uuid::new_v4()).await.is_err());
    }
}
