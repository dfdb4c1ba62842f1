//! Wire shapes exchanged with the fire-protocol service.

use serde::{Deserialize, Serialize};

use crate::domain::SubsystemState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerProtocolRequest {
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerProtocolResponse {
    pub acting_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<ProtocolFlow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolFlow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<StepFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprinkler_feedback: Option<StepFeedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFeedback {
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_system: Option<SubsystemReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprinkler_system: Option<SubsystemReport>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubsystemReport {
    pub state: SubsystemState,
}
