//! Request-side security heuristics
//!
//! Input sanitization, threat scoring, rate limiting, CSRF tokens and the
//! response decision built on top of them. All components share a
//! [`Clock`] and report to a [`SecurityEventLog`].

pub mod clock;
pub mod csrf;
pub mod events;
pub mod guard;
pub mod rate_limiter;
pub mod response;
pub mod sanitizer;
pub mod sweep;
pub mod threat_detection;

pub use clock::{Clock, ManualClock, SystemClock};
pub use csrf::{CsrfSessions, CsrfToken, CsrfTokenManager};
pub use events::{SecurityEvent, SecurityEventLog};
pub use guard::{FormSubmission, RejectionReason, SecurityCheck, SecurityGuard};
pub use rate_limiter::{
    FailedLoginTracker, RateLimitCleanupService, RateLimitRecord, RateLimitStore, RateLimiter,
};
pub use response::{ResponseAction, ThreatResponse, ThreatResponseDispatcher};
pub use sanitizer::{escape_html, sanitize_email, sanitize_input};
pub use sweep::{SecuritySweepService, SweepReport};
pub use threat_detection::{
    ThreatAnalysis, ThreatContext, ThreatDetector, ThreatHistoryEntry, ThreatHistoryStore,
    ThreatLevel, ThreatPattern, ThreatSeverity,
};
