//! Bot manager API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

// ================================= BOTS ===================================== //

/// One bot in the listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSummary {
    pub name: String,
    pub service_name: String,
    pub status: String,
    pub progress: u8,
}

/// Bot list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotListResponse {
    pub bots: Vec<BotSummary>,
}

/// Create bot request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
}

/// Response for create and upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotCreatedResponse {
    pub success: bool,
    pub bot_name: String,
    pub service_name: String,
    pub message: String,
}

// ================================= FILES ==================================== //

/// How file content is carried over JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    Base64,
}

/// File content response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
    pub encoding: FileEncoding,
}

/// Write file request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileRequest {
    pub content: String,
    #[serde(default)]
    pub encoding: FileEncoding,
}

/// File list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<String>,
}

/// Generic success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

// =============================== DEPLOYMENT ================================= //

/// Returned immediately when a deploy request is accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAcceptedResponse {
    pub success: bool,
    pub service_name: String,
    pub run_id: Uuid,
}

/// Stop/restart response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Deployment status of one bot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusResponse {
    pub bot_name: String,
    pub status: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

/// Snapshot of every known deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentsResponse {
    pub deployments: Vec<DeploymentStatusResponse>,
}

/// Service logs response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLogsResponse {
    pub success: bool,
    pub logs: Vec<String>,
}

// ================================= EVENTS =================================== //

/// `log` event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEventPayload {
    pub bot_name: String,
    pub message: String,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

/// `deploymentStatus` event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusPayload {
    pub bot_name: String,
    pub status: String,
    pub progress: u8,
}
