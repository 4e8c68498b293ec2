use serde::{Deserialize, Serialize};

use crate::security::{ThreatAnalysis, ThreatContext, ThreatResponse};

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub input: String,
    #[serde(default)]
    pub context: ThreatContext,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub analysis: ThreatAnalysis,
    pub response: ThreatResponse,
}
