//! Notification outbox
//!
//! Confirmed bookings enqueue their emails here and return. A
//! [`NotificationWorker`] drains the queue in the background, retrying
//! failed sends with exponential backoff and dead-lettering them once the
//! attempt budget is spent.

use super::mailer::Mailer;
use super::templates::{OutgoingEmail, render_admin_notification, render_client_confirmation};
use crate::config::NotificationConfig;
use crate::security::clock::{Clock, duration_millis};
use crate::types::{Appointment, Order};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Longest delay between retries
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ClientConfirmation,
    AdminNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub appointment: Appointment,
    pub order: Order,
    pub attempts: u32,
    /// Milliseconds since the Unix epoch
    pub next_attempt_at: u64,
    pub last_error: Option<String>,
}

pub struct NotificationOutbox {
    queue: Mutex<VecDeque<PendingNotification>>,
    dead_letters: Mutex<Vec<PendingNotification>>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl NotificationOutbox {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            dead_letters: Mutex::new(Vec::new()),
            notify: Notify::new(),
            clock,
        }
    }

    pub fn enqueue(&self, kind: NotificationKind, appointment: &Appointment, order: &Order) -> Uuid {
        let notification = PendingNotification {
            id: Uuid::new_v4(),
            kind,
            appointment: appointment.clone(),
            order: order.clone(),
            attempts: 0,
            next_attempt_at: self.clock.now_millis(),
            last_error: None,
        };
        let id = notification.id;

        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(notification);
        self.notify.notify_one();

        id
    }

    /// Queue the client confirmation and the admin notification
    pub fn enqueue_booking_confirmed(&self, appointment: &Appointment, order: &Order) {
        self.enqueue(NotificationKind::ClientConfirmation, appointment, order);
        self.enqueue(NotificationKind::AdminNotification, appointment, order);
    }

    /// Remove and return every notification due at or before now
    fn take_due(&self) -> Vec<PendingNotification> {
        let now = self.clock.now_millis();
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (due, waiting): (VecDeque<_>, VecDeque<_>) =
            queue.drain(..).partition(|n| n.next_attempt_at <= now);
        *queue = waiting;

        due.into_iter().collect()
    }

    fn requeue(&self, notification: PendingNotification) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(notification);
    }

    fn dead_letter(&self, notification: PendingNotification) {
        self.dead_letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification);
    }

    pub fn pending(&self) -> Vec<PendingNotification> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn dead_letters(&self) -> Vec<PendingNotification> {
        self.dead_letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counts from one pass over the due notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

pub struct NotificationWorker<M> {
    outbox: Arc<NotificationOutbox>,
    mailer: Arc<M>,
    config: NotificationConfig,
    admin_address: String,
    clock: Arc<dyn Clock>,
}

impl<M: Mailer + Send + Sync> NotificationWorker<M> {
    pub fn new(
        outbox: Arc<NotificationOutbox>,
        mailer: Arc<M>,
        config: NotificationConfig,
        admin_address: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            outbox,
            mailer,
            config,
            admin_address: admin_address.into(),
            clock,
        }
    }

    fn render(&self, notification: &PendingNotification) -> OutgoingEmail {
        match notification.kind {
            NotificationKind::ClientConfirmation => {
                render_client_confirmation(&notification.appointment, &notification.order)
            }
            NotificationKind::AdminNotification => render_admin_notification(
                &notification.appointment,
                &notification.order,
                &self.admin_address,
            ),
        }
    }

    /// Delay before attempt number `attempts + 1`
    fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        self.config
            .retry_base()
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }

    /// Attempt every due notification once
    pub async fn process_due(&self) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for mut notification in self.outbox.take_due() {
            let email = self.render(&notification);
            notification.attempts += 1;

            match self.mailer.send(&email).await {
                Ok(()) => {
                    tracing::info!(
                        "📨 {:?} delivered for appointment {}",
                        notification.kind,
                        notification.appointment.id
                    );
                    report.sent += 1;
                }
                Err(e) if notification.attempts >= self.config.max_attempts => {
                    tracing::error!(
                        "💀 {:?} for appointment {} dead-lettered after {} attempts: {}",
                        notification.kind,
                        notification.appointment.id,
                        notification.attempts,
                        e
                    );
                    notification.last_error = Some(e.to_string());
                    self.outbox.dead_letter(notification);
                    report.dead_lettered += 1;
                }
                Err(e) => {
                    let delay = self.backoff(notification.attempts);
                    tracing::warn!(
                        "🔁 {:?} for appointment {} failed (attempt {}), retrying in {:?}: {}",
                        notification.kind,
                        notification.appointment.id,
                        notification.attempts,
                        delay,
                        e
                    );
                    notification.last_error = Some(e.to_string());
                    notification.next_attempt_at =
                        self.clock.now_millis().saturating_add(duration_millis(delay));
                    self.outbox.requeue(notification);
                    report.retried += 1;
                }
            }
        }

        report
    }

    /// Deliver until the stop signal fires or its sender is dropped
    pub async fn run(self, mut stop_signal: tokio::sync::mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.poll_interval());

        tracing::info!(
            "📬 Notification worker started (poll interval: {:?})",
            self.config.poll_interval()
        );

        loop {
            tokio::select! {
                _ = self.outbox.notify.notified() => {
                    self.process_due().await;
                }
                _ = interval.tick() => {
                    self.process_due().await;
                }
                _ = stop_signal.recv() => {
                    tracing::info!("🛑 Notification worker stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use crate::{Error, Result};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` sends, then records deliveries
    #[derive(Default)]
    struct FlakyMailer {
        failures: AtomicU32,
        delivered: Mutex<Vec<OutgoingEmail>>,
    }

    impl FlakyMailer {
        fn failing(times: u32) -> Self {
            Self {
                failures: AtomicU32::new(times),
                ..Default::default()
            }
        }
    }

    impl Mailer for FlakyMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::notification("provider unavailable"));
            }
            self.delivered.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn booking() -> (Appointment, Order) {
        let appointment = Appointment::pending("client@example.com", "coaching");
        let order = Order {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            payment_session_id: "cs_test".to_string(),
            amount_total: 12000,
            currency: "usd".to_string(),
            customer_email: "client@example.com".to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        (appointment, order)
    }

    fn worker(
        mailer: FlakyMailer,
    ) -> (
        NotificationWorker<FlakyMailer>,
        Arc<NotificationOutbox>,
        Arc<FlakyMailer>,
        Arc<ManualClock>,
    ) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let outbox = Arc::new(NotificationOutbox::new(clock.clone()));
        let mailer = Arc::new(mailer);
        let worker = NotificationWorker::new(
            outbox.clone(),
            mailer.clone(),
            NotificationConfig::for_testing(),
            "support@example.com",
            clock.clone(),
        );
        (worker, outbox, mailer, clock)
    }

    #[tokio::test]
    async fn test_delivers_both_emails() {
        let (worker, outbox, mailer, _) = worker(FlakyMailer::default());
        let (appointment, order) = booking();

        outbox.enqueue_booking_confirmed(&appointment, &order);
        assert_eq!(outbox.len(), 2);

        let report = worker.process_due().await;
        assert_eq!(report.sent, 2);
        assert!(outbox.is_empty());

        let delivered = mailer.delivered.lock().unwrap();
        let recipients: Vec<_> = delivered.iter().map(|e| e.to.as_str()).collect();
        assert_eq!(recipients, ["client@example.com", "support@example.com"]);
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_after_backoff() {
        let (worker, outbox, mailer, clock) = worker(FlakyMailer::failing(1));
        let (appointment, order) = booking();

        outbox.enqueue(NotificationKind::ClientConfirmation, &appointment, &order);

        let report = worker.process_due().await;
        assert_eq!(report.retried, 1);

        let pending = outbox.pending();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("Notification error: provider unavailable"));

        // Not due yet
        assert_eq!(worker.process_due().await, DeliveryReport::default());

        clock.advance(Duration::from_secs(1));
        assert_eq!(worker.process_due().await.sent, 1);
        assert_eq!(mailer.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_letters_after_max_attempts() {
        let (worker, outbox, _, clock) = worker(FlakyMailer::failing(u32::MAX));
        let (appointment, order) = booking();

        outbox.enqueue(NotificationKind::AdminNotification, &appointment, &order);

        // for_testing allows three attempts
        for _ in 0..3 {
            worker.process_due().await;
            clock.advance(Duration::from_secs(60));
        }

        assert!(outbox.is_empty());
        let dead = outbox.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].kind, NotificationKind::AdminNotification);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let (worker, _, _, _) = worker(FlakyMailer::default());
        assert_eq!(worker.backoff(1), Duration::from_secs(1));
        assert_eq!(worker.backoff(2), Duration::from_secs(2));
        assert_eq!(worker.backoff(4), Duration::from_secs(8));
        assert_eq!(worker.backoff(40), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_worker_drains_on_notify_and_stops() {
        let (worker, outbox, mailer, _) = worker(FlakyMailer::default());
        let (stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);
        let handle = tokio::spawn(worker.run(stop_rx));

        let (appointment, order) = booking();
        outbox.enqueue_booking_confirmed(&appointment, &order);

        for _ in 0..50 {
            if mailer.delivered.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mailer.delivered.lock().unwrap().len(), 2);

        stop_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
