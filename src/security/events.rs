//! Security event log
//!
//! Every component that notices something worth auditing reports it here.
//! Events are emitted through `tracing` and kept in a bounded in-memory
//! buffer for the admin dashboard and for tests.

use crate::security::clock::{Clock, SystemClock};
use crate::security::threat_detection::ThreatLevel;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Maximum security events to keep in memory
const MAX_SECURITY_EVENTS: usize = 10_000;

/// Security event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    RateLimitViolation {
        key: String,
        count: u32,
        limit: u32,
        timestamp: u64,
    },
    ThreatDetected {
        source: String,
        threat_level: ThreatLevel,
        risk_score: u8,
        threats: Vec<String>,
        timestamp: u64,
    },
    CsrfValidationFailed {
        session_id: String,
        reason: String,
        timestamp: u64,
    },
    FailedLoginThreshold {
        key: String,
        failures: u32,
        timestamp: u64,
    },
    WebhookSignatureRejected {
        reason: String,
        timestamp: u64,
    },
    WebhookReconciled {
        event_id: String,
        appointment_id: Option<String>,
        outcome: String,
        timestamp: u64,
    },
}

impl SecurityEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::RateLimitViolation { timestamp, .. }
            | Self::ThreatDetected { timestamp, .. }
            | Self::CsrfValidationFailed { timestamp, .. }
            | Self::FailedLoginThreshold { timestamp, .. }
            | Self::WebhookSignatureRejected { timestamp, .. }
            | Self::WebhookReconciled { timestamp, .. } => *timestamp,
        }
    }
}

/// Bounded, shared security event log
pub struct SecurityEventLog {
    events: RwLock<VecDeque<SecurityEvent>>,
    clock: Arc<dyn Clock>,
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SecurityEventLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            clock,
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Record an event and emit it through tracing
    pub fn record(&self, event: SecurityEvent) {
        match &event {
            SecurityEvent::RateLimitViolation { key, count, limit, .. } => {
                tracing::warn!("🚦 Rate limit exceeded: key={}, count={}/{}", key, count, limit);
            }
            SecurityEvent::ThreatDetected {
                source,
                threat_level,
                risk_score,
                threats,
                ..
            } => {
                if *threat_level >= ThreatLevel::High {
                    tracing::error!(
                        "🚨 Threat detected: source={}, level={:?}, score={}, threats={:?}",
                        source,
                        threat_level,
                        risk_score,
                        threats
                    );
                } else {
                    tracing::warn!(
                        "⚠️  Threat detected: source={}, level={:?}, score={}, threats={:?}",
                        source,
                        threat_level,
                        risk_score,
                        threats
                    );
                }
            }
            SecurityEvent::CsrfValidationFailed { session_id, reason, .. } => {
                tracing::warn!("🛡️  CSRF validation failed: session={}, reason={}", session_id, reason);
            }
            SecurityEvent::FailedLoginThreshold { key, failures, .. } => {
                tracing::warn!("🔐 Failed login threshold reached: key={}, failures={}", key, failures);
            }
            SecurityEvent::WebhookSignatureRejected { reason, .. } => {
                tracing::warn!("✋ Webhook signature rejected: {}", reason);
            }
            SecurityEvent::WebhookReconciled {
                event_id, outcome, ..
            } => {
                tracing::debug!("🔒 Webhook reconciled: event={}, outcome={}", event_id, outcome);
            }
        }

        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push_back(event);

        while events.len() > MAX_SECURITY_EVENTS {
            events.pop_front();
        }
    }

    /// Record a rate-limit violation for `key`
    pub fn log_rate_limit_violation(&self, key: &str, count: u32, limit: u32) {
        self.record(SecurityEvent::RateLimitViolation {
            key: key.to_string(),
            count,
            limit,
            timestamp: self.now_millis(),
        });
    }

    /// Most recent events, newest last
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self
            .events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn count_matching(&self, predicate: impl Fn(&SecurityEvent) -> bool) -> usize {
        let events = self
            .events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        events.iter().filter(|event| predicate(event)).count()
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
