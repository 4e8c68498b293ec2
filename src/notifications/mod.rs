//! Booking confirmation emails
//!
//! Rendering, delivery backends and the retrying outbox that keeps email
//! delivery off the webhook's response path.

pub mod mailer;
pub mod outbox;
pub mod templates;

pub use mailer::{ConfiguredMailer, HttpMailer, LogMailer, Mailer};
pub use outbox::{
    DeliveryReport, NotificationKind, NotificationOutbox, NotificationWorker, PendingNotification,
};
pub use templates::{
    OutgoingEmail, format_currency, render_admin_notification, render_client_confirmation,
};
