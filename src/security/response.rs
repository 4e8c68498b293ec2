//! Threat response decisions
//!
//! Maps a [`ThreatAnalysis`] to an action for the caller. This module only
//! decides; blocking or challenging the request is up to whoever asked.

use crate::security::threat_detection::ThreatAnalysis;
use serde::{Deserialize, Serialize};

const BLOCK_SCORE: u8 = 75;
const CHALLENGE_SCORE: u8 = 50;
const MONITOR_SCORE: u8 = 25;

/// What the caller should do with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Block,
    Challenge,
    Monitor,
    None,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseAction::Block => "block",
            ResponseAction::Challenge => "challenge",
            ResponseAction::Monitor => "monitor",
            ResponseAction::None => "none",
        }
    }
}

/// Decision for one analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatResponse {
    pub action: ResponseAction,
    pub message: String,
    /// Whether a human should look at this source
    pub escalate: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreatResponseDispatcher;

impl ThreatResponseDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Decide on a response. Pure apart from logging.
    pub fn dispatch(&self, analysis: &ThreatAnalysis) -> ThreatResponse {
        let score = analysis.risk_score;

        let response = if score > BLOCK_SCORE {
            ThreatResponse {
                action: ResponseAction::Block,
                message: "Request blocked due to high risk activity".to_string(),
                escalate: true,
            }
        } else if score > CHALLENGE_SCORE {
            ThreatResponse {
                action: ResponseAction::Challenge,
                message: "Additional verification required".to_string(),
                escalate: false,
            }
        } else if score > MONITOR_SCORE {
            ThreatResponse {
                action: ResponseAction::Monitor,
                message: "Request allowed under monitoring".to_string(),
                escalate: false,
            }
        } else {
            ThreatResponse {
                action: ResponseAction::None,
                message: "No action required".to_string(),
                escalate: false,
            }
        };

        match response.action {
            ResponseAction::Block | ResponseAction::Challenge => tracing::warn!(
                "🛡️  Threat response {}: score={}, threats={:?}",
                response.action.as_str(),
                score,
                analysis.detected_threats
            ),
            ResponseAction::Monitor => tracing::info!(
                "👀 Threat response monitor: score={}, threats={:?}",
                score,
                analysis.detected_threats
            ),
            ResponseAction::None => {}
        }

        response
    }
}
