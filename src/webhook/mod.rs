//! Payment provider webhooks

pub mod event;
pub mod reconciler;
pub mod signature;

pub use event::{CHECKOUT_SESSION_COMPLETED, CheckoutSession, WebhookEvent};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};
pub use signature::{SIGNATURE_HEADER, SignatureVerifier, sign_payload};
