//! Deployment status of a bot

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    /// No entry in the store
    #[default]
    NotDeployed,

    /// Deploy pipeline in progress; progress is meaningful only here
    Deploying,

    /// Deployed and reported healthy
    Running,

    /// Stop command in flight
    Stopping,

    /// Scaled to zero, or deployed but not healthy
    Stopped,

    /// Restart command in flight
    Restarting,

    /// Last operation failed or was cancelled
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::NotDeployed => "not-deployed",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopping => "stopping",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Restarting => "restarting",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Whether an external command is currently working on the bot
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deploying | DeploymentStatus::Stopping | DeploymentStatus::Restarting
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-deployed" => Ok(DeploymentStatus::NotDeployed),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "running" => Ok(DeploymentStatus::Running),
            "stopping" => Ok(DeploymentStatus::Stopping),
            "stopped" => Ok(DeploymentStatus::Stopped),
            "restarting" => Ok(DeploymentStatus::Restarting),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// One bot's entry in the deployment store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub status: DeploymentStatus,

    /// 0-100
    pub progress: u8,

    pub updated_at: DateTime<Utc>,

    /// Build submitted by the current or last deploy pipeline
    pub build_id: Option<String>,
}

impl StatusEntry {
    pub fn new(status: DeploymentStatus, progress: u8) -> Self {
        Self {
            status,
            progress: progress.min(100),
            updated_at: Utc::now(),
            build_id: None,
        }
    }

    /// Entry reported for bots the store has never seen
    pub fn not_deployed() -> Self {
        Self::new(DeploymentStatus::NotDeployed, 0)
    }
}
