//! Error types for the bot manager

use thiserror::Error;

/// Main error type for the bot manager
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Bad bot identity or path; raised before any side effect
    #[error("{0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Non-zero exit from an external command
    #[error("Command `{command}` failed with {}", exit_label(*code))]
    ExternalCommand {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Command `{command}` exceeded the output limit of {limit} bytes")]
    OutputLimit { command: String, limit: usize },

    #[error("Build {build_id} did not finish after {attempts} status checks")]
    PollTimeout { build_id: String, attempts: u32 },

    #[error("Build {build_id} ended with status {status}")]
    BuildTerminal { build_id: String, status: String },

    #[error("A deployment is already in progress for {0}")]
    DeployInProgress(String),

    #[error("Deployment of {0} was cancelled")]
    Cancelled(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl ManagerError {
    /// Captured output lines of a failed external command, empty otherwise
    pub fn logs(&self) -> Vec<String> {
        match self {
            ManagerError::ExternalCommand { stdout, stderr, .. } => [stdout, stderr]
                .into_iter()
                .flat_map(|s| s.lines())
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ManagerError::ValidationError(_)
                | ManagerError::NotFound(_)
                | ManagerError::AlreadyExists(_)
                | ManagerError::DeployInProgress(_)
        )
    }
}
