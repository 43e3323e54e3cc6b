//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::bots::BotWorkspace;
use crate::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::deploy::platform::{CloudRunPlatform, Platform};
use crate::deploy::store::DeploymentStore;
use crate::errors::ManagerError;
use crate::events::EventBus;
use crate::runner::ProcessRunner;
use crate::sandbox::Sandbox;

/// Main application state
pub struct AppState {
    /// Bot project directories
    pub workspace: BotWorkspace,

    /// Deploy pipeline and lifecycle operations
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state against the real platform CLI
    pub async fn init(options: &AppOptions) -> Result<Self, ManagerError> {
        info!("Initializing application state...");

        let sandbox = Sandbox::new(&options.bots_dir).await?;
        info!("Bots directory: {}", sandbox.root().display());

        let runner = Arc::new(ProcessRunner::new(options.max_output_bytes));
        let platform = Arc::new(CloudRunPlatform::new(runner, options.platform.clone()));

        Ok(Self::with_platform(
            sandbox,
            platform,
            options.orchestrator.clone(),
            options.event_capacity,
        ))
    }

    /// Wire state around any platform implementation
    pub fn with_platform(
        sandbox: Sandbox,
        platform: Arc<dyn Platform>,
        orchestrator_options: OrchestratorOptions,
        event_capacity: usize,
    ) -> Self {
        let store = Arc::new(DeploymentStore::new());
        let bus = EventBus::new(store, event_capacity);
        let orchestrator = Arc::new(Orchestrator::new(
            sandbox.clone(),
            platform,
            bus,
            orchestrator_options,
        ));

        Self {
            workspace: BotWorkspace::new(sandbox),
            orchestrator,
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        info!("Shutting down application state...");
        let deploying = self.orchestrator.in_flight_count();
        if deploying > 0 {
            info!("Abandoning {} deployment(s) in progress", deploying);
        }
        Ok(())
    }
}
