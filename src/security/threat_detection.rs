//! Pattern-based threat scoring for submitted text
//!
//! Inputs are scored against a fixed table of indicator substrings, one list
//! per threat category, and then against a few behavioral signals derived
//! from the request context and from recent match history:
//! - indicator counts at or above a pattern's threshold add its severity weight
//! - repeated matches from one ip inside a minute flag a rapid request pattern
//! - scanner user agents and GET probes of admin paths add smaller penalties
//!
//! The result is advisory. Callers decide what to do with it, usually via
//! [`crate::security::ThreatResponseDispatcher`].

use crate::security::clock::{Clock, SystemClock, duration_millis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Maximum events kept per history entry
const MAX_HISTORY_EVENTS: usize = 50;

/// Window for the rapid request check
const RAPID_REQUEST_WINDOW: Duration = Duration::from_secs(60);

/// Matches within the window above which a source counts as rapid
const RAPID_REQUEST_THRESHOLD: u32 = 20;

const RAPID_REQUEST_SCORE: u32 = 30;
const SUSPICIOUS_AGENT_SCORE: u32 = 20;
const ADMIN_RECON_SCORE: u32 = 15;

/// Maximum risk score
const MAX_RISK_SCORE: u32 = 100;

pub const RAPID_REQUEST_PATTERN: &str = "Rapid Request Pattern";
pub const SUSPICIOUS_USER_AGENT: &str = "Suspicious User Agent";
pub const ADMIN_RECONNAISSANCE: &str = "Admin Area Reconnaissance";

/// User agent fragments used by scanners and scripted clients
const SCANNER_AGENTS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "acunetix",
    "nessus",
    "dirbuster",
    "gobuster",
    "wpscan",
    "zgrab",
    "python-requests",
    "curl/",
    "wget/",
    "scrapy",
    "headlesschrome",
    "nuclei",
    "httpx",
    "libwww-perl",
    "go-http-client",
    "mj12bot",
    "dotbot",
    "petalbot",
];

/// Paths an outsider has no business probing
const ADMIN_PATHS: &[&str] = &[
    "/admin",
    "/wp-admin",
    "/wp-login.php",
    "/phpmyadmin",
    "/administrator",
    "/.env",
    "/.git",
    "/config",
    "/dashboard",
];

/// Severity of a single threat pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatSeverity {
    /// Risk score contribution of a match
    pub fn weight(&self) -> u32 {
        match self {
            Self::Low => 10,
            Self::Medium => 25,
            Self::High => 50,
            Self::Critical => 100,
        }
    }
}

/// Overall threat level of an analysis
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl From<ThreatSeverity> for ThreatLevel {
    fn from(severity: ThreatSeverity) -> Self {
        match severity {
            ThreatSeverity::Low => Self::Low,
            ThreatSeverity::Medium => Self::Medium,
            ThreatSeverity::High => Self::High,
            ThreatSeverity::Critical => Self::Critical,
        }
    }
}

/// A static threat category with its indicator substrings
#[derive(Debug, Clone, Serialize)]
pub struct ThreatPattern {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: ThreatSeverity,
    /// Lower-case indicator substrings
    pub indicators: &'static [&'static str],
    /// Distinct indicators that must be present for a match
    pub threshold: usize,
    /// Span after which a source's match count starts over
    pub time_window: Duration,
}

impl ThreatPattern {
    /// Number of indicators present in already lower-cased input
    pub fn count_indicators(&self, lowered: &str) -> usize {
        self.indicators
            .iter()
            .filter(|indicator| lowered.contains(*indicator))
            .count()
    }
}

/// The built-in pattern table
pub fn default_patterns() -> Vec<ThreatPattern> {
    vec![
        ThreatPattern {
            id: "sql_injection",
            name: "SQL Injection Attempt",
            severity: ThreatSeverity::Critical,
            indicators: &[
                "' or '1'='1",
                "' or 1=1",
                " or 1=1",
                "union select",
                "drop table",
                "insert into",
                "delete from",
                "';",
                "--",
                "/*",
                "*/",
                "; drop",
                "xp_cmdshell",
                "exec(",
                "information_schema",
                "sleep(",
                "benchmark(",
            ],
            threshold: 2,
            time_window: Duration::from_secs(300),
        },
        ThreatPattern {
            id: "xss_attempt",
            name: "Cross-Site Scripting Attempt",
            severity: ThreatSeverity::High,
            indicators: &[
                "<script",
                "javascript:",
                "vbscript:",
                "onerror=",
                "onload=",
                "onmouseover=",
                "<iframe",
                "<svg",
                "document.cookie",
                "alert(",
                "eval(",
            ],
            threshold: 1,
            time_window: Duration::from_secs(300),
        },
        ThreatPattern {
            id: "path_traversal",
            name: "Path Traversal Attempt",
            severity: ThreatSeverity::High,
            indicators: &[
                "../",
                "..\\",
                "%2e%2e",
                "%252e",
                "/etc/passwd",
                "c:\\windows",
            ],
            threshold: 1,
            time_window: Duration::from_secs(600),
        },
        ThreatPattern {
            id: "command_injection",
            name: "Command Injection Attempt",
            severity: ThreatSeverity::Critical,
            indicators: &[
                "; rm ",
                "&& ",
                "| cat",
                "| sh",
                "`",
                "$(",
                "/bin/sh",
                "/bin/bash",
                "wget ",
                "curl ",
                "; ls",
                "nc -e",
            ],
            threshold: 2,
            time_window: Duration::from_secs(300),
        },
        ThreatPattern {
            id: "template_injection",
            name: "Template Injection Attempt",
            severity: ThreatSeverity::Medium,
            indicators: &["{{", "}}", "${", "<%", "%>", "#{"],
            threshold: 2,
            time_window: Duration::from_secs(900),
        },
    ]
}

/// Request context accompanying an input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
}

impl ThreatContext {
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }

    fn source(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

/// Outcome of analyzing one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAnalysis {
    pub threat_level: ThreatLevel,
    pub detected_threats: Vec<String>,
    pub recommendations: Vec<String>,
    /// 0 to 100
    pub risk_score: u8,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl ThreatAnalysis {
    pub fn has_threat(&self, name: &str) -> bool {
        self.detected_threats.iter().any(|threat| threat == name)
    }

    pub fn is_clean(&self) -> bool {
        self.threat_level == ThreatLevel::None && self.risk_score == 0
    }
}

/// One matching input recorded against a history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub timestamp: u64,
    pub matched_indicators: usize,
    pub path: Option<String>,
    pub user_agent: Option<String>,
}

/// Match history for one pattern and one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatHistoryEntry {
    pub pattern_id: String,
    pub source: String,
    pub count: u32,
    pub first_seen: u64,
    pub last_seen: u64,
    pub events: VecDeque<ThreatEvent>,
}

/// Process-local match history, keyed by `"{pattern_id}_{source}"`
#[derive(Default)]
pub struct ThreatHistoryStore {
    entries: RwLock<HashMap<String, ThreatHistoryEntry>>,
}

impl ThreatHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_key(pattern_id: &str, source: &str) -> String {
        format!("{pattern_id}_{source}")
    }

    fn record_match(&self, pattern: &ThreatPattern, source: &str, event: ThreatEvent) {
        let now = event.timestamp;
        let window = duration_millis(pattern.time_window);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = entries
            .entry(Self::history_key(pattern.id, source))
            .or_insert_with(|| ThreatHistoryEntry {
                pattern_id: pattern.id.to_string(),
                source: source.to_string(),
                count: 0,
                first_seen: now,
                last_seen: now,
                events: VecDeque::new(),
            });

        // The pattern's window bounds how long matches keep accumulating
        if now.saturating_sub(entry.first_seen) > window {
            entry.count = 0;
            entry.first_seen = now;
            entry.events.clear();
        }

        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;
        entry.events.push_back(event);

        while entry.events.len() > MAX_HISTORY_EVENTS {
            entry.events.pop_front();
        }
    }

    /// Sum of match counts for `source` across entries seen since `since`
    fn recent_activity(&self, source: &str, since: u64) -> u32 {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        entries
            .values()
            .filter(|entry| entry.source == source && entry.last_seen >= since)
            .map(|entry| entry.count)
            .fold(0u32, u32::saturating_add)
    }

    /// Remove entries not seen since `cutoff`, returning how many were removed
    fn remove_older_than(&self, cutoff: u64) -> usize {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = entries.len();
        entries.retain(|_, entry| entry.last_seen >= cutoff);
        before - entries.len()
    }

    pub fn get(&self, key: &str) -> Option<ThreatHistoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<ThreatHistoryEntry> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scores inputs against the pattern table and behavioral signals
pub struct ThreatDetector {
    patterns: Vec<ThreatPattern>,
    history: Arc<ThreatHistoryStore>,
    clock: Arc<dyn Clock>,
}

impl Default for ThreatDetector {
    fn default() -> Self {
        Self::new(Arc::new(ThreatHistoryStore::new()), Arc::new(SystemClock))
    }
}

impl ThreatDetector {
    pub fn new(history: Arc<ThreatHistoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_patterns(default_patterns(), history, clock)
    }

    pub fn with_patterns(
        patterns: Vec<ThreatPattern>,
        history: Arc<ThreatHistoryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            patterns,
            history,
            clock,
        }
    }

    pub fn patterns(&self) -> &[ThreatPattern] {
        &self.patterns
    }

    pub fn history(&self) -> &Arc<ThreatHistoryStore> {
        &self.history
    }

    /// Longest span any rule looks back over; older history is dead weight
    pub fn longest_window(&self) -> Duration {
        self.patterns
            .iter()
            .map(|pattern| pattern.time_window)
            .fold(RAPID_REQUEST_WINDOW, |longest, window| longest.max(window))
    }

    /// Analyze `input` in its request context. Never fails.
    pub fn analyze_threat(&self, input: &str, context: &ThreatContext) -> ThreatAnalysis {
        let now = self.clock.now_millis();
        let lowered = input.to_lowercase();
        let source = context.source();

        let mut threat_level = ThreatLevel::None;
        let mut detected_threats = Vec::new();
        let mut score: u32 = 0;

        for pattern in &self.patterns {
            let matched = pattern.count_indicators(&lowered);
            if matched < pattern.threshold || matched == 0 {
                continue;
            }

            detected_threats.push(pattern.name.to_string());
            score = score.saturating_add(pattern.severity.weight());
            threat_level = threat_level.max(ThreatLevel::from(pattern.severity));

            self.history.record_match(
                pattern,
                source,
                ThreatEvent {
                    timestamp: now,
                    matched_indicators: matched,
                    path: context.path.clone(),
                    user_agent: context.user_agent.clone(),
                },
            );
        }

        // Behavioral pass: flags and score only, the level stays pattern-driven
        if let Some(ip) = context.ip.as_deref() {
            let since = now.saturating_sub(duration_millis(RAPID_REQUEST_WINDOW));
            if self.history.recent_activity(ip, since) > RAPID_REQUEST_THRESHOLD {
                detected_threats.push(RAPID_REQUEST_PATTERN.to_string());
                score = score.saturating_add(RAPID_REQUEST_SCORE);
            }
        }

        if let Some(agent) = context.user_agent.as_deref() {
            let agent = agent.to_lowercase();
            if SCANNER_AGENTS.iter().any(|scanner| agent.contains(scanner)) {
                detected_threats.push(SUSPICIOUS_USER_AGENT.to_string());
                score = score.saturating_add(SUSPICIOUS_AGENT_SCORE);
            }
        }

        if let (Some(path), Some(method)) = (context.path.as_deref(), context.method.as_deref()) {
            let path = path.to_lowercase();
            if method.eq_ignore_ascii_case("GET")
                && ADMIN_PATHS.iter().any(|admin| path.starts_with(admin))
            {
                detected_threats.push(ADMIN_RECONNAISSANCE.to_string());
                score = score.saturating_add(ADMIN_RECON_SCORE);
            }
        }

        let risk_score = score.min(MAX_RISK_SCORE) as u8;
        let recommendations = recommendations_for(&detected_threats, risk_score);

        ThreatAnalysis {
            threat_level,
            detected_threats,
            recommendations,
            risk_score,
            timestamp: now,
        }
    }

    /// Drop history entries not seen within `max_age`
    pub fn clear_threat_history(&self, max_age: Duration) -> usize {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(duration_millis(max_age));
        let removed = self.history.remove_older_than(cutoff);

        if removed > 0 {
            tracing::info!("🧹 Threat history cleanup: removed {} entries", removed);
        }

        removed
    }
}

fn recommendations_for(threats: &[String], risk_score: u8) -> Vec<String> {
    let mut recommendations: Vec<String> = Vec::new();

    for threat in threats {
        let advice = match threat.as_str() {
            "SQL Injection Attempt" => "Use parameterized queries and reject the submitted input",
            "Cross-Site Scripting Attempt" => {
                "Encode output and enforce a strict Content-Security-Policy"
            }
            "Path Traversal Attempt" => "Validate file paths against an allow-list",
            "Command Injection Attempt" => "Never pass user input to a shell; audit the affected endpoint",
            "Template Injection Attempt" => "Render user input as data, never as a template",
            RAPID_REQUEST_PATTERN => "Apply stricter rate limiting to this source",
            SUSPICIOUS_USER_AGENT => "Challenge automated clients before serving forms",
            ADMIN_RECONNAISSANCE => "Restrict admin routes to authenticated staff",
            _ => continue,
        };

        if !recommendations.iter().any(|existing| existing == advice) {
            recommendations.push(advice.to_string());
        }
    }

    if risk_score > 75 {
        recommendations.push("Block the source immediately and escalate to the security team".to_string());
    } else if risk_score > 50 {
        recommendations.push("Increase friction: require CAPTCHA or additional verification".to_string());
    } else if risk_score > 25 {
        recommendations.push("Monitor this source for further suspicious activity".to_string());
    }

    recommendations
}
