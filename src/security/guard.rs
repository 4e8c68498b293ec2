//! Security check for form submissions
//!
//! Runs the request-side heuristics in order: rate limit, CSRF, sanitize,
//! analyze, dispatch. The first failing gate decides the rejection.

use crate::config::SecurityConfig;
use crate::security::clock::{Clock, SystemClock};
use crate::security::csrf::CsrfSessions;
use crate::security::events::{SecurityEvent, SecurityEventLog};
use crate::security::rate_limiter::{FailedLoginTracker, RateLimitStore, RateLimiter};
use crate::security::response::{ResponseAction, ThreatResponse, ThreatResponseDispatcher};
use crate::security::sanitizer::{sanitize_email, sanitize_input};
use crate::security::threat_detection::{
    ThreatAnalysis, ThreatContext, ThreatDetector, ThreatHistoryStore, ThreatLevel,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A submitted form and the request it arrived on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormSubmission {
    pub session_id: String,
    pub csrf_token: Option<String>,
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub context: ThreatContext,
}

impl FormSubmission {
    pub fn new(session_id: impl Into<String>, context: ThreatContext) -> Self {
        Self {
            session_id: session_id.into(),
            context,
            ..Default::default()
        }
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RateLimited,
    InvalidCsrfToken,
    ThreatBlocked,
}

/// Result of checking one submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityCheck {
    pub allowed: bool,
    pub rejection: Option<RejectionReason>,
    pub sanitized_fields: BTreeMap<String, String>,
    pub analysis: Option<ThreatAnalysis>,
    pub response: Option<ThreatResponse>,
    pub challenge_required: bool,
}

impl SecurityCheck {
    fn rejected(reason: RejectionReason) -> Self {
        Self {
            allowed: false,
            rejection: Some(reason),
            sanitized_fields: BTreeMap::new(),
            analysis: None,
            response: None,
            challenge_required: false,
        }
    }
}

/// Owns the security components for one process
pub struct SecurityGuard {
    config: SecurityConfig,
    rate_limiter: RateLimiter,
    failed_logins: FailedLoginTracker,
    csrf: Arc<CsrfSessions>,
    detector: Arc<ThreatDetector>,
    dispatcher: ThreatResponseDispatcher,
    events: Arc<SecurityEventLog>,
}

impl SecurityGuard {
    pub fn new(config: SecurityConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(SecurityEventLog::new(clock.clone()));
        let rate_limiter = RateLimiter::new(
            Arc::new(RateLimitStore::new()),
            clock.clone(),
            events.clone(),
        );
        let failed_logins = FailedLoginTracker::new(
            config.failed_login_limit,
            config.failed_login_window(),
            clock.clone(),
            events.clone(),
        );

        Self {
            rate_limiter,
            failed_logins,
            csrf: Arc::new(CsrfSessions::new(clock.clone())),
            detector: Arc::new(ThreatDetector::new(
                Arc::new(ThreatHistoryStore::new()),
                clock,
            )),
            dispatcher: ThreatResponseDispatcher::new(),
            events,
            config,
        }
    }

    pub fn for_testing(clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(SecurityConfig::for_testing(), clock)
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn csrf(&self) -> &Arc<CsrfSessions> {
        &self.csrf
    }

    pub fn detector(&self) -> &Arc<ThreatDetector> {
        &self.detector
    }

    pub fn events(&self) -> &Arc<SecurityEventLog> {
        &self.events
    }

    /// Token to embed in the form served to `session_id`
    pub fn issue_csrf_token(&self, session_id: &str) -> String {
        self.csrf.session(session_id).get()
    }

    /// Run every gate over `submission`
    pub fn check_submission(&self, submission: &FormSubmission) -> SecurityCheck {
        let ip = submission.context.ip.as_deref().unwrap_or("unknown");

        if self.rate_limiter.check(
            ip,
            self.config.rate_limit_max_requests,
            self.config.rate_limit_window(),
        ) {
            return SecurityCheck::rejected(RejectionReason::RateLimited);
        }

        let csrf_valid = submission
            .csrf_token
            .as_deref()
            .is_some_and(|token| self.csrf.validate(&submission.session_id, token));

        if !csrf_valid {
            let reason = if submission.csrf_token.is_none() {
                "missing token"
            } else {
                "token mismatch or expired"
            };
            self.events.record(SecurityEvent::CsrfValidationFailed {
                session_id: submission.session_id.clone(),
                reason: reason.to_string(),
                timestamp: self.events.now_millis(),
            });
            return SecurityCheck::rejected(RejectionReason::InvalidCsrfToken);
        }

        let sanitized_fields = submission
            .fields
            .iter()
            .map(|(name, value)| {
                let sanitized = if name == "email" {
                    sanitize_email(value)
                } else {
                    sanitize_input(value, self.config.max_input_length)
                };
                (name.clone(), sanitized)
            })
            .collect();

        let raw = submission
            .fields
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        let (analysis, response) = self.analyze(&raw, &submission.context);

        let blocked = response.action == ResponseAction::Block;
        SecurityCheck {
            allowed: !blocked,
            rejection: blocked.then_some(RejectionReason::ThreatBlocked),
            sanitized_fields,
            challenge_required: response.action == ResponseAction::Challenge,
            analysis: Some(analysis),
            response: Some(response),
        }
    }

    /// Analyze and dispatch without the rate-limit and CSRF gates
    pub fn analyze(&self, input: &str, context: &ThreatContext) -> (ThreatAnalysis, ThreatResponse) {
        let analysis = self.detector.analyze_threat(input, context);
        let response = self.dispatcher.dispatch(&analysis);

        if analysis.threat_level > ThreatLevel::None {
            self.events.record(SecurityEvent::ThreatDetected {
                source: context.ip.clone().unwrap_or_else(|| "unknown".to_string()),
                threat_level: analysis.threat_level,
                risk_score: analysis.risk_score,
                threats: analysis.detected_threats.clone(),
                timestamp: analysis.timestamp,
            });
        }

        (analysis, response)
    }

    /// Count a failed login for `key`; true once the limit is reached
    pub fn record_failed_login(&self, key: &str) -> bool {
        self.failed_logins.record_failure(key)
    }

    pub fn record_successful_login(&self, key: &str) {
        self.failed_logins.record_success(key);
    }
}
