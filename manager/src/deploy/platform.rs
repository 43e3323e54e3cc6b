//! Managed container platform, driven through its CLI

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::ManagerError;
use crate::runner::{CommandLine, CommandOutput, CommandRunner, LineSink};
use crate::sandbox::ServiceName;
use crate::storage::settings::PlatformSettings;

/// Status of a submitted build job, as reported by the build service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Queued,
    Working,
    Success,
    Failure,
    Cancelled,
    Timeout,
    /// Anything else; treated as still in progress
    Other(String),
}

impl BuildStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => BuildStatus::Queued,
            "WORKING" => BuildStatus::Working,
            "SUCCESS" => BuildStatus::Success,
            "FAILURE" => BuildStatus::Failure,
            "CANCELLED" => BuildStatus::Cancelled,
            "TIMEOUT" => BuildStatus::Timeout,
            _ => BuildStatus::Other(raw.trim().to_string()),
        }
    }

    /// Failed terminal states: no further progress will happen
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BuildStatus::Failure | BuildStatus::Cancelled | BuildStatus::Timeout
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == BuildStatus::Success || self.is_failure()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Queued => f.write_str("QUEUED"),
            BuildStatus::Working => f.write_str("WORKING"),
            BuildStatus::Success => f.write_str("SUCCESS"),
            BuildStatus::Failure => f.write_str("FAILURE"),
            BuildStatus::Cancelled => f.write_str("CANCELLED"),
            BuildStatus::Timeout => f.write_str("TIMEOUT"),
            BuildStatus::Other(s) if s.is_empty() => f.write_str("UNKNOWN"),
            BuildStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Operations the orchestrator needs from the platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Submit a container build without waiting; returns the build id
    async fn submit_build(&self, service: &ServiceName, source_dir: &Path) -> Result<String, ManagerError>;

    async fn build_status(&self, build_id: &str) -> Result<BuildStatus, ManagerError>;

    async fn cancel_build(&self, build_id: &str) -> Result<(), ManagerError>;

    /// Deploy the built image; blocks until the platform CLI exits
    async fn deploy_service(
        &self,
        service: &ServiceName,
        on_line: Option<LineSink<'_>>,
    ) -> Result<CommandOutput, ManagerError>;

    async fn scale_service(
        &self,
        service: &ServiceName,
        min_instances: u32,
        max_instances: u32,
    ) -> Result<CommandOutput, ManagerError>;

    async fn delete_service(&self, service: &ServiceName) -> Result<(), ManagerError>;

    /// Whether the service reports itself ready
    async fn service_ready(&self, service: &ServiceName) -> Result<bool, ManagerError>;

    /// Most recent non-blank log lines of the service
    async fn service_logs(&self, service: &ServiceName, limit: usize) -> Result<Vec<String>, ManagerError>;
}

/// Cloud Run + Cloud Build through `gcloud`
pub struct CloudRunPlatform {
    runner: Arc<dyn CommandRunner>,
    settings: PlatformSettings,
}

impl CloudRunPlatform {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: PlatformSettings) -> Self {
        Self { runner, settings }
    }

    fn command<I, S>(&self, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd = CommandLine::new(&self.settings.cli).args(args);
        if self.settings.project_id.is_empty() {
            cmd
        } else {
            cmd.arg(format!("--project={}", self.settings.project_id))
        }
    }

    fn image(&self, service: &ServiceName) -> Result<String, ManagerError> {
        if self.settings.project_id.is_empty() {
            return Err(ManagerError::ConfigError(
                "platform.project_id must be set to build images".to_string(),
            ));
        }
        Ok(format!("{}/{}/{}", self.settings.registry, self.settings.project_id, service))
    }

    fn region_arg(&self) -> String {
        format!("--region={}", self.settings.region)
    }

    pub fn submit_build_command(&self, service: &ServiceName, source_dir: &Path) -> Result<CommandLine, ManagerError> {
        Ok(self.command([
            "builds".to_string(),
            "submit".to_string(),
            "--async".to_string(),
            format!("--tag={}", self.image(service)?),
            "--format=value(id)".to_string(),
            source_dir.to_string_lossy().into_owned(),
        ]))
    }

    pub fn deploy_command(&self, service: &ServiceName) -> Result<CommandLine, ManagerError> {
        Ok(self.command([
            "run".to_string(),
            "deploy".to_string(),
            service.to_string(),
            format!("--image={}", self.image(service)?),
            "--platform=managed".to_string(),
            self.region_arg(),
            "--allow-unauthenticated".to_string(),
            "--min-instances=0".to_string(),
            format!("--max-instances={}", self.settings.max_instances),
            format!("--memory={}", self.settings.memory),
            format!("--cpu={}", self.settings.cpu),
        ]))
    }

    pub fn scale_command(&self, service: &ServiceName, min_instances: u32, max_instances: u32) -> CommandLine {
        self.command([
            "run".to_string(),
            "services".to_string(),
            "update".to_string(),
            service.to_string(),
            self.region_arg(),
            format!("--min-instances={min_instances}"),
            format!("--max-instances={max_instances}"),
        ])
    }
}

#[async_trait]
impl Platform for CloudRunPlatform {
    async fn submit_build(&self, service: &ServiceName, source_dir: &Path) -> Result<String, ManagerError> {
        let cmd = self.submit_build_command(service, source_dir)?;
        info!("Submitting build for {}", service);
        let output = self.runner.run(&cmd, None).await?;

        output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| ManagerError::Internal(format!("`{}` returned no build id", cmd)))
    }

    async fn build_status(&self, build_id: &str) -> Result<BuildStatus, ManagerError> {
        let cmd = self.command(["builds", "describe", build_id, "--format=value(status)"]);
        let output = self.runner.run(&cmd, None).await?;
        Ok(BuildStatus::parse(&output.stdout))
    }

    async fn cancel_build(&self, build_id: &str) -> Result<(), ManagerError> {
        let cmd = self.command(["builds", "cancel", build_id]);
        self.runner.run(&cmd, None).await?;
        Ok(())
    }

    async fn deploy_service(
        &self,
        service: &ServiceName,
        on_line: Option<LineSink<'_>>,
    ) -> Result<CommandOutput, ManagerError> {
        let cmd = self.deploy_command(service)?;
        info!("Deploying service {}", service);
        self.runner.run(&cmd, on_line).await
    }

    async fn scale_service(
        &self,
        service: &ServiceName,
        min_instances: u32,
        max_instances: u32,
    ) -> Result<CommandOutput, ManagerError> {
        let cmd = self.scale_command(service, min_instances, max_instances);
        self.runner.run(&cmd, None).await
    }

    async fn delete_service(&self, service: &ServiceName) -> Result<(), ManagerError> {
        let cmd = self.command([
            "run".to_string(),
            "services".to_string(),
            "delete".to_string(),
            service.to_string(),
            self.region_arg(),
            "--quiet".to_string(),
        ]);
        self.runner.run(&cmd, None).await?;
        Ok(())
    }

    async fn service_ready(&self, service: &ServiceName) -> Result<bool, ManagerError> {
        let cmd = self.command([
            "run".to_string(),
            "services".to_string(),
            "describe".to_string(),
            service.to_string(),
            self.region_arg(),
            "--format=value(status.conditions[0].status)".to_string(),
        ]);
        let output = self.runner.run(&cmd, None).await?;
        debug!("Readiness of {}: {:?}", service, output.stdout.trim());
        Ok(output.stdout.contains("True"))
    }

    async fn service_logs(&self, service: &ServiceName, limit: usize) -> Result<Vec<String>, ManagerError> {
        let cmd = self.command([
            "run".to_string(),
            "services".to_string(),
            "logs".to_string(),
            "read".to_string(),
            service.to_string(),
            self.region_arg(),
            format!("--limit={limit}"),
        ]);
        let output = self.runner.run(&cmd, None).await?;
        Ok(output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}
