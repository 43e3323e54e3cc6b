//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::deploy::poller::PollerOptions;
use crate::errors::ManagerError;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::runner::DEFAULT_MAX_OUTPUT_BYTES;

/// Manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to daily files in the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Root directory holding one directory per bot
    #[serde(default = "default_bots_dir")]
    pub bots_dir: PathBuf,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Container platform configuration
    #[serde(default)]
    pub platform: PlatformSettings,

    /// Deploy pipeline tuning
    #[serde(default)]
    pub deploy: DeploySettings,

    /// Event stream configuration
    #[serde(default)]
    pub events: EventSettings,
}

fn default_bots_dir() -> PathBuf {
    PathBuf::from("./bots")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            bots_dir: default_bots_dir(),
            server: ServerSettings::default(),
            platform: PlatformSettings::default(),
            deploy: DeploySettings::default(),
            events: EventSettings::default(),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, ManagerError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            ManagerError::ConfigError(format!("{}: {}", file.path().display(), e))
        })
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Container platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Platform CLI executable
    #[serde(default = "default_cli")]
    pub cli: String,

    /// Cloud project owning builds and services
    #[serde(default)]
    pub project_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Image registry host
    #[serde(default = "default_registry")]
    pub registry: String,

    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default = "default_cpu")]
    pub cpu: String,

    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

fn default_cli() -> String {
    "gcloud".to_string()
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_registry() -> String {
    "gcr.io".to_string()
}

fn default_memory() -> String {
    "256Mi".to_string()
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_max_instances() -> u32 {
    1
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            project_id: String::new(),
            region: default_region(),
            registry: default_registry(),
            memory: default_memory(),
            cpu: default_cpu(),
            max_instances: default_max_instances(),
        }
    }
}

/// Deploy pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Combined stdout+stderr cap per external command
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_poll_max_attempts() -> u32 {
    60
}

fn default_settle_delay() -> u64 {
    3
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            poll_max_attempts: default_poll_max_attempts(),
            settle_delay_secs: default_settle_delay(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Event stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Events buffered per observer before the oldest are dropped
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Settings {
    /// Orchestrator options derived from these settings
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            poller: PollerOptions {
                interval: Duration::from_secs(self.deploy.poll_interval_secs),
                max_attempts: self.deploy.poll_max_attempts,
            },
            settle_delay: Duration::from_secs(self.deploy.settle_delay_secs),
            max_instances: self.platform.max_instances,
        }
    }
}
