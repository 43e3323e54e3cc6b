//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::Engine;
use openapi_server::models::{
    BotCreatedResponse, BotListResponse, BotSummary, ControlResponse, CreateBotRequest,
    DeployAcceptedResponse, DeploymentStatusResponse, DeploymentsResponse, FileContentResponse,
    FileEncoding, FileListResponse, HealthResponse, ServiceLogsResponse, SuccessResponse,
    VersionResponse, WriteFileRequest,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::deploy::status::StatusEntry;
use crate::errors::ManagerError;
use crate::runner::CommandOutput;
use crate::sandbox::BotIdentity;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Multipart field carrying an uploaded bot
pub const UPLOAD_FIELD: &str = "botFile";

pub const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

type Shared = State<Arc<ServerState>>;

// ================================ SERVICE ===================================== //

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "botmgr".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================== BOTS ====================================== //

/// Every bot with its current deployment status
pub async fn list_bots_handler(State(state): Shared) -> Result<impl IntoResponse, ManagerError> {
    let store = state.orchestrator.bus().store();
    let bots = state
        .workspace
        .list()
        .await?
        .into_iter()
        .map(|identity| {
            let entry = store.status(&identity);
            BotSummary {
                service_name: identity.service_name().to_string(),
                name: identity.to_string(),
                status: entry.status.to_string(),
                progress: entry.progress,
            }
        })
        .collect();

    Ok(Json(BotListResponse { bots }))
}

pub async fn create_bot_handler(
    State(state): Shared,
    Json(request): Json<CreateBotRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let identity = state.workspace.create(&request.name).await?;
    Ok((StatusCode::CREATED, Json(created(&identity, "Bot created"))))
}

/// Accept a single entry file under the `botFile` field
pub async fn upload_handler(
    State(state): Shared,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ManagerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ManagerError::ValidationError(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let contents = field
            .bytes()
            .await
            .map_err(|e| ManagerError::ValidationError(e.body_text()))?;

        let identity = state.workspace.upload(&file_name, &contents).await?;
        return Ok((StatusCode::CREATED, Json(created(&identity, "Bot uploaded"))));
    }

    Err(ManagerError::ValidationError(format!(
        "no file uploaded in field `{UPLOAD_FIELD}`"
    )))
}

fn created(identity: &BotIdentity, message: &str) -> BotCreatedResponse {
    BotCreatedResponse {
        success: true,
        bot_name: identity.to_string(),
        service_name: identity.service_name().to_string(),
        message: message.to_string(),
    }
}

pub async fn delete_bot_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    state.orchestrator.delete(&name).await?;
    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Bot {name} deleted"),
    }))
}

// ================================== FILES ===================================== //

pub async fn list_files_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    let files = state.workspace.list_files(&name).await?;
    Ok(Json(FileListResponse { files }))
}

/// Text files come back as UTF-8, anything else as base64
pub async fn read_file_handler(
    State(state): Shared,
    Path((name, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ManagerError> {
    let bytes = state.workspace.read_file(&name, &path).await?;
    let (content, encoding) = match String::from_utf8(bytes) {
        Ok(text) => (text, FileEncoding::Utf8),
        Err(e) => (
            base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
            FileEncoding::Base64,
        ),
    };
    Ok(Json(FileContentResponse {
        path,
        content,
        encoding,
    }))
}

pub async fn write_file_handler(
    State(state): Shared,
    Path((name, path)): Path<(String, String)>,
    Json(request): Json<WriteFileRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let contents = decode_content(&request)?;
    state.workspace.write_file(&name, &path, &contents, false).await?;
    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Saved {path}"),
    }))
}

pub async fn create_file_handler(
    State(state): Shared,
    Path((name, path)): Path<(String, String)>,
    Json(request): Json<WriteFileRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let contents = decode_content(&request)?;
    state.workspace.write_file(&name, &path, &contents, true).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            success: true,
            message: format!("Created {path}"),
        }),
    ))
}

pub async fn delete_file_handler(
    State(state): Shared,
    Path((name, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ManagerError> {
    state.workspace.delete_file(&name, &path).await?;
    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Deleted {path}"),
    }))
}

fn decode_content(request: &WriteFileRequest) -> Result<Vec<u8>, ManagerError> {
    match request.encoding {
        FileEncoding::Utf8 => Ok(request.content.clone().into_bytes()),
        FileEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(&request.content)
            .map_err(|e| ManagerError::ValidationError(format!("invalid base64 content: {e}"))),
    }
}

// ================================= CONFIG ===================================== //

pub async fn get_config_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    Ok(Json(state.workspace.get_config(&name).await?))
}

pub async fn put_config_handler(
    State(state): Shared,
    Path(name): Path<String>,
    Json(manifest): Json<Value>,
) -> Result<impl IntoResponse, ManagerError> {
    state.workspace.put_config(&name, &manifest).await?;
    Ok(Json(SuccessResponse {
        success: true,
        message: "Configuration saved".to_string(),
    }))
}

// =============================== DEPLOYMENT =================================== //

/// Starts the pipeline and answers 202 right away; progress arrives on the
/// event stream
pub async fn deploy_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    let ticket = state.orchestrator.deploy(&name).await?;
    info!(bot = %ticket.identity, run_id = %ticket.run_id, "Deployment started");

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployAcceptedResponse {
            success: true,
            service_name: ticket.service_name.to_string(),
            run_id: ticket.run_id,
        }),
    ))
}

pub async fn stop_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    let output = state.orchestrator.stop(&name).await?;
    Ok(Json(control("Bot stopped", output)))
}

pub async fn restart_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    let output = state.orchestrator.restart(&name).await?;
    Ok(Json(control("Bot restarted", output)))
}

fn control(message: &str, output: CommandOutput) -> ControlResponse {
    let combined = format!("{}{}", output.stdout, output.stderr);
    let combined = combined.trim();
    ControlResponse {
        success: true,
        message: message.to_string(),
        output: (!combined.is_empty()).then(|| combined.to_string()),
    }
}

pub async fn cancel_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    state.orchestrator.cancel(&name).await?;
    Ok(Json(SuccessResponse {
        success: true,
        message: "Deployment cancelled".to_string(),
    }))
}

pub async fn status_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    let (identity, entry) = state.orchestrator.status(&name)?;
    Ok(Json(status_response(&identity, entry)))
}

pub async fn deployments_handler(State(state): Shared) -> impl IntoResponse {
    let deployments = state
        .orchestrator
        .statuses()
        .into_iter()
        .map(|(identity, entry)| status_response(&identity, entry))
        .collect();
    Json(DeploymentsResponse { deployments })
}

fn status_response(identity: &BotIdentity, entry: StatusEntry) -> DeploymentStatusResponse {
    DeploymentStatusResponse {
        bot_name: identity.to_string(),
        status: entry.status.to_string(),
        progress: entry.progress,
        updated_at: Some(entry.updated_at),
        build_id: entry.build_id,
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// Recent log lines of the deployed service
pub async fn service_logs_handler(
    State(state): Shared,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ManagerError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let logs = state.orchestrator.service_logs(&name, limit).await?;
    Ok(Json(ServiceLogsResponse {
        success: true,
        logs,
    }))
}
