//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::runner::DEFAULT_MAX_OUTPUT_BYTES;
use crate::storage::settings::{PlatformSettings, Settings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Root directory holding the bots
    pub bots_dir: PathBuf,

    /// Server configuration
    pub server: ServerOptions,

    /// Platform CLI configuration
    pub platform: PlatformSettings,

    /// Deploy pipeline configuration
    pub orchestrator: OrchestratorOptions,

    /// Combined output cap per external command
    pub max_output_bytes: usize,

    /// Events buffered per observer
    pub event_capacity: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            bots_dir: PathBuf::from("./bots"),
            server: ServerOptions::default(),
            platform: PlatformSettings::default(),
            orchestrator: OrchestratorOptions::default(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            bots_dir: settings.bots_dir.clone(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            platform: settings.platform.clone(),
            orchestrator: settings.orchestrator_options(),
            max_output_bytes: settings.deploy.max_output_bytes,
            event_capacity: settings.events.capacity,
        }
    }
}

/// Lifecycle options for the manager
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}
