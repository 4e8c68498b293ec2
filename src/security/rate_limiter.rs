//! Fixed-window rate limiting
//!
//! Counts calls per caller-supplied key (usually a client ip) in fixed
//! windows. Bursts straddling a window boundary can briefly exceed the
//! nominal rate.
//!
//! State lives in an explicit [`RateLimitStore`] owned by the host process,
//! swept periodically by [`RateLimitCleanupService`].

use crate::security::clock::{Clock, duration_millis};
use crate::security::events::{SecurityEvent, SecurityEventLog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// How long after its window ends a record is kept before sweeping
const STALE_RECORD_GRACE: Duration = Duration::from_secs(300);

/// Per-key counter for the current window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub count: u32,
    /// End of the current window (ms since epoch)
    pub reset_time: u64,
    pub blocked: bool,
    pub first_attempt: u64,
}

impl RateLimitRecord {
    fn fresh(now: u64, window: Duration) -> Self {
        Self {
            count: 1,
            reset_time: now.saturating_add(duration_millis(window)),
            blocked: false,
            first_attempt: now,
        }
    }
}

/// Shared storage for rate-limit records
#[derive(Default)]
pub struct RateLimitStore {
    records: RwLock<HashMap<String, RateLimitRecord>>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<RateLimitRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-window rate limiter over a [`RateLimitStore`]
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<RateLimitStore>,
    clock: Arc<dyn Clock>,
    events: Arc<SecurityEventLog>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<RateLimitStore>,
        clock: Arc<dyn Clock>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self {
            store,
            clock,
            events,
        }
    }

    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    /// Count a call for `key`. Returns `true` when the call is rejected
    /// because `limit` calls were already made in the current window.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> bool {
        let now = self.clock.now_millis();

        let violation = {
            let mut records = self
                .store
                .records
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            match records.get_mut(key) {
                Some(record) if now <= record.reset_time => {
                    if record.count >= limit {
                        record.blocked = true;
                        Some(record.count)
                    } else {
                        record.count += 1;
                        None
                    }
                }
                _ => {
                    records.insert(key.to_string(), RateLimitRecord::fresh(now, window));
                    None
                }
            }
        };

        match violation {
            Some(count) => {
                self.events.log_rate_limit_violation(key, count, limit);
                true
            }
            None => false,
        }
    }

    /// Whether `key` was rejected in its still-running window
    pub fn is_blocked(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.store
            .get(key)
            .is_some_and(|record| record.blocked && now <= record.reset_time)
    }

    /// Forget `key` entirely
    pub fn reset(&self, key: &str) {
        self.store
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    /// Delete records whose window ended more than five minutes ago
    pub fn cleanup(&self) -> usize {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(duration_millis(STALE_RECORD_GRACE));

        let mut records = self
            .store
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = records.len();
        records.retain(|_, record| record.reset_time >= cutoff);
        let removed = before - records.len();

        if removed > 0 {
            tracing::info!("🧹 Rate limit cleanup: removed {} stale records", removed);
        }

        removed
    }
}

/// Failed-login counter that reports when a key reaches its limit
pub struct FailedLoginTracker {
    limit: u32,
    window: Duration,
    failures: RwLock<HashMap<String, RateLimitRecord>>,
    clock: Arc<dyn Clock>,
    events: Arc<SecurityEventLog>,
}

impl FailedLoginTracker {
    pub fn new(
        limit: u32,
        window: Duration,
        clock: Arc<dyn Clock>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self {
            limit: limit.max(1),
            window,
            failures: RwLock::new(HashMap::new()),
            clock,
            events,
        }
    }

    /// Record a failed login for `key`. Returns `true` once the failures in
    /// the current window reach the limit; the attempt that reaches it logs
    /// a rate-limit violation.
    pub fn record_failure(&self, key: &str) -> bool {
        let now = self.clock.now_millis();

        let count = {
            let mut failures = self
                .failures
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            match failures.get_mut(key) {
                Some(record) if now <= record.reset_time => {
                    record.count = record.count.saturating_add(1);
                    if record.count >= self.limit {
                        record.blocked = true;
                    }
                    record.count
                }
                _ => {
                    let mut record = RateLimitRecord::fresh(now, self.window);
                    record.blocked = record.count >= self.limit;
                    failures.insert(key.to_string(), record);
                    1
                }
            }
        };

        if count == self.limit {
            self.events.log_rate_limit_violation(key, count, self.limit);
            self.events.record(SecurityEvent::FailedLoginThreshold {
                key: key.to_string(),
                failures: count,
                timestamp: now,
            });
        }

        count >= self.limit
    }

    /// Clear the failure count after a successful login
    pub fn record_success(&self, key: &str) {
        self.failures
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        let now = self.clock.now_millis();
        self.failures
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .filter(|record| now <= record.reset_time)
            .map(|record| record.count)
            .unwrap_or(0)
    }
}

/// Background service that sweeps stale rate-limit records
pub struct RateLimitCleanupService {
    limiter: RateLimiter,
    stop_signal: tokio::sync::mpsc::Receiver<()>,
    cleanup_interval: Duration,
}

impl RateLimitCleanupService {
    pub fn new(
        limiter: RateLimiter,
        stop_signal: tokio::sync::mpsc::Receiver<()>,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            limiter,
            stop_signal,
            cleanup_interval,
        }
    }

    /// Run until the stop signal fires or its sender is dropped
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.cleanup_interval);

        tracing::info!(
            "🧹 Rate limit cleanup service started (interval: {:?})",
            self.cleanup_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.limiter.cleanup();
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Rate limit cleanup service stopping");
                    break;
                }
            }
        }

        tracing::info!("✅ Rate limit cleanup service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;

    fn limiter() -> (RateLimiter, Arc<ManualClock>, Arc<SecurityEventLog>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let events = Arc::new(SecurityEventLog::new(clock.clone()));
        let limiter = RateLimiter::new(Arc::new(RateLimitStore::new()), clock.clone(), events.clone());
        (limiter, clock, events)
    }

    fn violations(events: &SecurityEventLog) -> usize {
        events.count_matching(|e| matches!(e, SecurityEvent::RateLimitViolation { .. }))
    }

    #[test]
    fn test_fixed_window_limit() {
        let (limiter, clock, events) = limiter();
        let window = Duration::from_millis(1000);

        assert!(!limiter.check("10.0.0.1", 3, window));
        assert!(!limiter.check("10.0.0.1", 3, window));
        assert!(!limiter.check("10.0.0.1", 3, window));
        assert_eq!(violations(&events), 0);

        assert!(limiter.check("10.0.0.1", 3, window));
        assert!(limiter.is_blocked("10.0.0.1"));
        assert_eq!(violations(&events), 1);

        clock.advance(Duration::from_millis(1001));
        assert!(!limiter.check("10.0.0.1", 3, window));
        assert!(!limiter.is_blocked("10.0.0.1"));

        let record = limiter.store().get("10.0.0.1").unwrap();
        assert_eq!(record.count, 1);
        assert!(!record.blocked);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _, _) = limiter();
        let window = Duration::from_secs(60);

        assert!(!limiter.check("a", 1, window));
        assert!(limiter.check("a", 1, window));
        assert!(!limiter.check("b", 1, window));
    }

    #[test]
    fn test_reset_forgets_key() {
        let (limiter, _, _) = limiter();
        let window = Duration::from_secs(60);

        limiter.check("a", 1, window);
        assert!(limiter.check("a", 1, window));

        limiter.reset("a");
        assert!(!limiter.check("a", 1, window));
    }

    #[test]
    fn test_cleanup_removes_stale_records() {
        let (limiter, clock, _) = limiter();

        limiter.check("old", 5, Duration::from_secs(60));
        clock.advance(Duration::from_secs(60 + 301));
        limiter.check("new", 5, Duration::from_secs(60));

        assert_eq!(limiter.cleanup(), 1);
        assert!(limiter.store().get("old").is_none());
        assert!(limiter.store().get("new").is_some());
    }

    #[test]
    fn test_failed_login_violation_on_fifth_attempt() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let events = Arc::new(SecurityEventLog::new(clock.clone()));
        let tracker =
            FailedLoginTracker::new(5, Duration::from_secs(300), clock.clone(), events.clone());

        for attempt in 1..=4 {
            assert!(!tracker.record_failure("client@example.com"));
            assert_eq!(violations(&events), 0, "no violation on attempt {attempt}");
            clock.advance(Duration::from_secs(30));
        }

        assert!(tracker.record_failure("client@example.com"));
        assert_eq!(violations(&events), 1);
        assert_eq!(tracker.failures("client@example.com"), 5);

        // Further failures stay over the limit without duplicate reports
        assert!(tracker.record_failure("client@example.com"));
        assert_eq!(violations(&events), 1);
    }

    #[test]
    fn test_failed_login_window_and_success_reset() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let events = Arc::new(SecurityEventLog::new(clock.clone()));
        let tracker =
            FailedLoginTracker::new(3, Duration::from_secs(300), clock.clone(), events.clone());

        tracker.record_failure("k");
        tracker.record_failure("k");
        clock.advance(Duration::from_secs(301));
        assert!(!tracker.record_failure("k"));
        assert_eq!(tracker.failures("k"), 1);

        tracker.record_success("k");
        assert_eq!(tracker.failures("k"), 0);
    }

    #[tokio::test]
    async fn test_cleanup_service_stops_on_signal() {
        let (limiter, _, _) = limiter();
        let (stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);

        let service = RateLimitCleanupService::new(limiter, stop_rx, Duration::from_millis(10));
        let handle = tokio::spawn(service.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("service should stop")
            .unwrap();
    }
}
