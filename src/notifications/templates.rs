//! Email bodies for a confirmed booking

use crate::security::sanitizer::escape_html;
use crate::types::{Appointment, Order};
use serde::{Deserialize, Serialize};

/// A rendered email ready for a [`super::Mailer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Format minor units as a display amount, e.g. `150000, "usd"` as `$1,500.00`
pub fn format_currency(minor_units: i64, currency: &str) -> String {
    let negative = minor_units < 0;
    let abs = minor_units.unsigned_abs();
    let whole = group_thousands(abs / 100);
    let amount = format!("{whole}.{:02}", abs % 100);
    let sign = if negative { "-" } else { "" };

    match currency.to_ascii_lowercase().as_str() {
        "usd" => format!("{sign}${amount}"),
        "eur" => format!("{sign}€{amount}"),
        "gbp" => format!("{sign}£{amount}"),
        other => format!("{sign}{amount} {}", other.to_ascii_uppercase()),
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    grouped
}

fn scheduled_label(appointment: &Appointment) -> String {
    appointment
        .scheduled_for
        .map(|at| at.format("%A, %B %-d, %Y at %H:%M UTC").to_string())
        .unwrap_or_else(|| "To be scheduled".to_string())
}

fn details_table(appointment: &Appointment, order: &Order, transaction_id: &str) -> String {
    let rows = [
        ("Service", appointment.display_service()),
        ("Date", scheduled_label(appointment)),
        ("Amount", format_currency(order.amount_total, &order.currency)),
        ("Transaction ID", transaction_id.to_string()),
    ];

    let mut html = String::from("<table cellpadding=\"6\">");
    for (label, value) in rows {
        html.push_str(&format!(
            "<tr><td><strong>{label}</strong></td><td>{}</td></tr>",
            escape_html(&value)
        ));
    }
    html.push_str("</table>");
    html
}

fn transaction_id(order: &Order) -> &str {
    order
        .metadata
        .get("payment_intent")
        .map(String::as_str)
        .unwrap_or(&order.payment_session_id)
}

pub fn render_client_confirmation(appointment: &Appointment, order: &Order) -> OutgoingEmail {
    let greeting = appointment
        .client_name
        .as_deref()
        .map(|name| format!("Dear {},", escape_html(name)))
        .unwrap_or_else(|| "Hello,".to_string());

    let html = format!(
        "<p>{greeting}</p>\
         <p>Thank you for your payment. Your appointment is confirmed.</p>\
         {}\
         <p>If you need to reschedule, simply reply to this email.</p>",
        details_table(appointment, order, transaction_id(order))
    );

    OutgoingEmail {
        to: order.customer_email.clone(),
        subject: format!("Appointment confirmed: {}", appointment.display_service()),
        html,
    }
}

pub fn render_admin_notification(
    appointment: &Appointment,
    order: &Order,
    admin_address: &str,
) -> OutgoingEmail {
    let client = appointment
        .client_name
        .clone()
        .unwrap_or_else(|| order.customer_email.clone());

    let html = format!(
        "<p>A new paid booking has been confirmed.</p>\
         <p><strong>Client:</strong> {} &lt;{}&gt;</p>\
         {}\
         <p>Appointment ID: {}</p>",
        escape_html(&client),
        escape_html(&order.customer_email),
        details_table(appointment, order, transaction_id(order)),
        appointment.id
    );

    OutgoingEmail {
        to: admin_address.to_string(),
        subject: format!(
            "New booking: {} ({})",
            appointment.display_service(),
            format_currency(order.amount_total, &order.currency)
        ),
        html,
    }
}
