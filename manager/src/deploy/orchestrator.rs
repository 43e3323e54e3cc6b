//! Deployment orchestrator
//!
//! Runs the build → poll → deploy → verify pipeline in the background and
//! the synchronous stop/restart/cancel/delete operations. All status changes
//! go through the event bus, which writes them to the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deploy::cancel::{cancel_pair, CancelHandle, CancelSignal};
use crate::deploy::platform::Platform;
use crate::deploy::poller::{wait_for_build, PollerOptions};
use crate::deploy::status::{DeploymentStatus, StatusEntry};
use crate::errors::ManagerError;
use crate::events::{EventBus, LogKind};
use crate::filesys::dir::Dir;
use crate::runner::{CommandOutput, OutputLine};
use crate::sandbox::{BotIdentity, Sandbox, ServiceName};
use crate::utils::dir_digest;

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub poller: PollerOptions,

    /// Wait between a successful deploy and the readiness check
    pub settle_delay: Duration,

    /// Upper instance bound applied by restart
    pub max_instances: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            poller: PollerOptions::default(),
            settle_delay: Duration::from_secs(3),
            max_instances: 1,
        }
    }
}

/// Handed back as soon as a deploy is accepted
#[derive(Debug)]
pub struct DeployTicket {
    pub identity: BotIdentity,
    pub service_name: ServiceName,
    pub run_id: Uuid,
    /// Background pipeline; dropping it detaches the task
    pub handle: JoinHandle<()>,
}

struct InFlight {
    run_id: Uuid,
    cancel: CancelHandle,
}

/// Coordinates sandbox, platform, store and event bus
pub struct Orchestrator {
    sandbox: Sandbox,
    platform: Arc<dyn Platform>,
    bus: EventBus,
    options: OrchestratorOptions,
    in_flight: Mutex<HashMap<BotIdentity, InFlight>>,
}

impl Orchestrator {
    pub fn new(
        sandbox: Sandbox,
        platform: Arc<dyn Platform>,
        bus: EventBus,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            sandbox,
            platform,
            bus,
            options,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Whether a deploy pipeline is running for the bot
    pub fn is_deploying(&self, identity: &BotIdentity) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.contains_key(identity)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ================================= DEPLOY ===================================== //

    /// Validate the bot, mark it `deploying@0` and start the pipeline in the
    /// background. Returns before the deployment completes; its outcome is
    /// only visible through the event bus and the store.
    pub async fn deploy(self: &Arc<Self>, raw_name: &str) -> Result<DeployTicket, ManagerError> {
        let identity = self.existing_identity(raw_name).await?;
        let bot_dir = self.sandbox.resolve_bot_dir(&identity).await?;

        let run_id = Uuid::new_v4();
        let (cancel, signal) = cancel_pair();
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.contains_key(&identity) {
                return Err(ManagerError::DeployInProgress(identity.to_string()));
            }
            in_flight.insert(identity.clone(), InFlight { run_id, cancel });
        }

        let service_name = identity.service_name();
        info!(bot = %identity, %run_id, "Deployment accepted");
        self.publish_for(&identity, run_id, |bus| {
            bus.store().set_build_id(&identity, None);
            bus.publish_status(&identity, DeploymentStatus::Deploying, 0);
            bus.publish_log(
                &identity,
                format!("Starting deployment of {service_name}..."),
                LogKind::Info,
            );
        });

        let this = Arc::clone(self);
        let task_identity = identity.clone();
        let handle = tokio::spawn(async move {
            this.run_pipeline(task_identity, bot_dir, run_id, signal).await;
        });

        Ok(DeployTicket {
            identity,
            service_name,
            run_id,
            handle,
        })
    }

    async fn run_pipeline(&self, identity: BotIdentity, bot_dir: PathBuf, run_id: Uuid, mut signal: CancelSignal) {
        let result = self.pipeline_steps(&identity, &bot_dir, run_id, &mut signal).await;

        match result {
            Ok(()) => {}
            Err(ManagerError::Cancelled(_)) => {
                info!(bot = %identity, %run_id, "Stopped observing cancelled deployment");
            }
            Err(e) => {
                error!(bot = %identity, %run_id, "Deployment failed: {}", e);
                self.publish_for(&identity, run_id, |bus| {
                    bus.publish_status(&identity, DeploymentStatus::Failed, 0);
                    bus.publish_log(&identity, format!("Deployment failed: {e}"), LogKind::Error);
                });
            }
        }

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(&identity).is_some_and(|f| f.run_id == run_id) {
            in_flight.remove(&identity);
        }
    }

    /// Publish on behalf of pipeline `run_id`. Nothing is published once
    /// cancel or delete has detached it; returns whether `publish` ran.
    fn publish_for(&self, identity: &BotIdentity, run_id: Uuid, publish: impl FnOnce(&EventBus)) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.get(identity).is_some_and(|f| f.run_id == run_id) {
            return false;
        }
        publish(&self.bus);
        true
    }

    async fn pipeline_steps(
        &self,
        identity: &BotIdentity,
        bot_dir: &Path,
        run_id: Uuid,
        signal: &mut CancelSignal,
    ) -> Result<(), ManagerError> {
        let service = identity.service_name();
        let cancelled = || ManagerError::Cancelled(identity.to_string());
        let log = |message: String, kind: LogKind| {
            self.publish_for(identity, run_id, |bus| bus.publish_log(identity, message, kind));
        };

        if let Ok(digest) = dir_digest(bot_dir).await {
            log(format!("Source digest: {digest}"), LogKind::Info);
        }

        // 1. Submit the build
        log("Submitting container build...".to_string(), LogKind::Info);
        let build_id = self.platform.submit_build(&service, bot_dir).await?;
        let recorded = self.publish_for(identity, run_id, |bus| {
            bus.store().set_build_id(identity, Some(build_id.clone()));
            bus.publish_log(identity, format!("Build submitted: {build_id}"), LogKind::Info);
            bus.publish_status(identity, DeploymentStatus::Deploying, 20);
        });
        if !recorded {
            // cancelled mid-submit, so the canceller never saw this build id
            if let Err(e) = self.platform.cancel_build(&build_id).await {
                warn!(bot = %identity, %build_id, "Build cancel failed: {}", e);
            }
            return Err(cancelled());
        }

        // 2. Wait for it
        wait_for_build(
            self.platform.as_ref(),
            &self.bus,
            identity,
            &build_id,
            &self.options.poller,
            signal,
        )
        .await?;
        let built = self.publish_for(identity, run_id, |bus| {
            bus.publish_log(identity, "Container built successfully", LogKind::Success);
            bus.publish_status(identity, DeploymentStatus::Deploying, 60);
        });
        if !built {
            return Err(cancelled());
        }

        // 3. Deploy, streaming the CLI output
        log(format!("Deploying {service}..."), LogKind::Info);
        let sink = |line: OutputLine| {
            let kind = line.kind();
            log(line.text, kind);
        };
        self.platform.deploy_service(&service, Some(&sink)).await?;
        if signal.is_cancelled() {
            return Err(cancelled());
        }

        // 4. Verify
        tokio::select! {
            _ = tokio::time::sleep(self.options.settle_delay) => {}
            _ = signal.cancelled() => return Err(cancelled()),
        }
        let ready = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(cancelled()),
            ready = self.platform.service_ready(&service) => ready,
        };
        let (status, progress, message, kind) = match ready {
            Ok(true) => (DeploymentStatus::Running, 100, "Bot deployed successfully".to_string(), LogKind::Success),
            Ok(false) => (
                DeploymentStatus::Stopped,
                0,
                "Deployed, but the service is not ready".to_string(),
                LogKind::Error,
            ),
            Err(e) => {
                warn!(bot = %identity, "Readiness check failed: {}", e);
                (DeploymentStatus::Stopped, 0, format!("Readiness check failed: {e}"), LogKind::Error)
            }
        };
        let finished = self.publish_for(identity, run_id, |bus| {
            bus.publish_status(identity, status, progress);
            bus.publish_log(identity, message, kind);
        });
        if !finished {
            return Err(cancelled());
        }

        Ok(())
    }

    // ============================== STOP / RESTART ================================ //

    /// Scale the service to zero
    pub async fn stop(&self, raw_name: &str) -> Result<CommandOutput, ManagerError> {
        let identity = self.idle_identity(raw_name).await?;
        let service = identity.service_name();

        self.bus.publish_status(&identity, DeploymentStatus::Stopping, 0);
        self.bus.publish_log(&identity, format!("Stopping {service}..."), LogKind::Info);

        match self.platform.scale_service(&service, 0, 0).await {
            Ok(output) => {
                self.bus.publish_status(&identity, DeploymentStatus::Stopped, 0);
                self.bus.publish_log(&identity, "Bot stopped (scaled to 0)", LogKind::Success);
                Ok(output)
            }
            Err(e) => Err(self.fail(&identity, "Stop", e)),
        }
    }

    /// Allow the service to scale up again
    pub async fn restart(&self, raw_name: &str) -> Result<CommandOutput, ManagerError> {
        let identity = self.idle_identity(raw_name).await?;
        let service = identity.service_name();

        self.bus.publish_status(&identity, DeploymentStatus::Restarting, 0);
        self.bus.publish_log(&identity, format!("Restarting {service}..."), LogKind::Info);

        match self
            .platform
            .scale_service(&service, 0, self.options.max_instances)
            .await
        {
            Ok(output) => {
                self.bus.publish_status(&identity, DeploymentStatus::Running, 100);
                self.bus.publish_log(&identity, "Bot restarted", LogKind::Success);
                Ok(output)
            }
            Err(e) => Err(self.fail(&identity, "Restart", e)),
        }
    }

    async fn idle_identity(&self, raw_name: &str) -> Result<BotIdentity, ManagerError> {
        let identity = self.existing_identity(raw_name).await?;
        if self.is_deploying(&identity) {
            return Err(ManagerError::DeployInProgress(identity.to_string()));
        }
        Ok(identity)
    }

    /// Parse the name and require the bot's directory to exist
    async fn existing_identity(&self, raw_name: &str) -> Result<BotIdentity, ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        let bot_dir = self.sandbox.resolve_bot_dir(&identity).await?;
        if !Dir::new(&bot_dir).exists().await {
            return Err(ManagerError::NotFound(format!("bot {identity}")));
        }
        Ok(identity)
    }

    fn fail(&self, identity: &BotIdentity, operation: &str, e: ManagerError) -> ManagerError {
        error!(bot = %identity, "{} failed: {}", operation, e);
        self.bus.publish_status(identity, DeploymentStatus::Failed, 0);
        self.bus.publish_log(identity, format!("{operation} failed: {e}"), LogKind::Error);
        for line in e.logs() {
            self.bus.publish_log(identity, line, LogKind::Output);
        }
        e
    }

    // ============================== CANCEL / DELETE =============================== //

    /// Mark the bot `failed@0` and stop observing any running pipeline.
    ///
    /// A submitted build is cancelled on the platform on a best-effort basis;
    /// a deploy command that is already running is left to finish.
    pub async fn cancel(&self, raw_name: &str) -> Result<(), ManagerError> {
        let identity = self.existing_identity(raw_name).await?;
        let was_running = self.detach_pipeline(&identity);

        self.bus.publish_status(&identity, DeploymentStatus::Failed, 0);
        self.bus.publish_log(&identity, "Deployment cancelled", LogKind::Error);

        if was_running {
            if let Some(build_id) = self.bus.store().get(&identity).and_then(|e| e.build_id) {
                if let Err(e) = self.platform.cancel_build(&build_id).await {
                    warn!(bot = %identity, %build_id, "Build cancel failed: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Remove the deployed service (best-effort), the bot's directory and its
    /// store entry. The entry is cleared even when the other steps fail.
    pub async fn delete(&self, raw_name: &str) -> Result<(), ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        let service = identity.service_name();
        self.detach_pipeline(&identity);

        self.bus.publish_log(&identity, format!("Deleting {service}..."), LogKind::Info);
        if let Err(e) = self.platform.delete_service(&service).await {
            warn!(bot = %identity, "Ignoring service removal failure: {}", e);
        }

        let local = self.remove_local(&identity).await;
        self.bus.publish_removed(&identity);

        local?;
        self.bus.publish_log(&identity, "Bot deleted", LogKind::Success);
        Ok(())
    }

    async fn remove_local(&self, identity: &BotIdentity) -> Result<(), ManagerError> {
        let dir = self.sandbox.resolve_bot_dir(identity).await?;
        if dir == self.sandbox.root() {
            return Err(ManagerError::ValidationError(crate::sandbox::INVALID_MESSAGE.to_string()));
        }
        Dir::new(dir).delete().await
    }

    fn detach_pipeline(&self, identity: &BotIdentity) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        match in_flight.remove(identity) {
            Some(flight) => {
                info!(bot = %identity, run_id = %flight.run_id, "Cancelling deployment");
                flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    // ================================== QUERIES =================================== //

    pub fn status(&self, raw_name: &str) -> Result<(BotIdentity, StatusEntry), ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        let entry = self.bus.store().status(&identity);
        Ok((identity, entry))
    }

    pub fn statuses(&self) -> Vec<(BotIdentity, StatusEntry)> {
        self.bus.store().list()
    }

    pub async fn service_logs(&self, raw_name: &str, limit: usize) -> Result<Vec<String>, ManagerError> {
        let identity = BotIdentity::parse(raw_name)?;
        self.platform.service_logs(&identity.service_name(), limit).await
    }
}
