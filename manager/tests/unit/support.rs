//! Scripted platform and wiring shared by the integration tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use botmgr::app::state::AppState;
use botmgr::bots::BotWorkspace;
use botmgr::deploy::orchestrator::{Orchestrator, OrchestratorOptions};
use botmgr::deploy::platform::{BuildStatus, Platform};
use botmgr::errors::ManagerError;
use botmgr::events::{BotEvent, LogKind};
use botmgr::runner::{CommandOutput, LineSink, LineStream, OutputLine};
use botmgr::sandbox::{Sandbox, ServiceName};
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

pub const BUILD_ID: &str = "abc123";

fn failure(command: &str) -> ManagerError {
    ManagerError::ExternalCommand {
        command: format!("fake {command}"),
        code: Some(1),
        stdout: String::new(),
        stderr: format!("ERROR: {command} rejected"),
    }
}

/// Platform call that blocks until [`FakePlatform::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    BuildStatus,
    Deploy,
    Ready,
}

/// Behaviour of the fake platform, set before the test runs
#[derive(Debug, Clone)]
pub struct Script {
    pub submit_fails: bool,
    /// Answers to successive status queries; `None` is a query error.
    /// Once drained every query answers WORKING.
    pub statuses: VecDeque<Option<BuildStatus>>,
    pub deploy_lines: Vec<(LineStream, String)>,
    pub deploy_fails: bool,
    /// `None` makes the readiness query fail
    pub ready: Option<bool>,
    pub scale_fails: bool,
    pub delete_fails: bool,
    pub hold: Option<Hold>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            submit_fails: false,
            statuses: VecDeque::from([Some(BuildStatus::Success)]),
            deploy_lines: Vec::new(),
            deploy_fails: false,
            ready: Some(true),
            scale_fails: false,
            delete_fails: false,
            hold: None,
        }
    }
}

impl Script {
    /// Builds stay WORKING forever
    pub fn never_finishing() -> Self {
        Self {
            statuses: VecDeque::new(),
            ..Self::default()
        }
    }

    pub fn holding(hold: Hold) -> Self {
        Self {
            hold: Some(hold),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = Option<BuildStatus>>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }
}

/// Records every call and answers from its [`Script`]
#[derive(Debug, Default)]
pub struct FakePlatform {
    script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    entered: Notify,
    released: Notify,
}

impl FakePlatform {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
            entered: Notify::new(),
            released: Notify::new(),
        }
    }

    /// Resolves once a held call has started
    pub async fn held(&self) {
        self.entered.notified().await;
    }

    /// Let the held call finish
    pub fn release(&self) {
        self.released.notify_one();
    }

    async fn gate(&self, at: Hold) {
        let held = self.script().hold == Some(at);
        if held {
            self.entered.notify_one();
            self.released.notified().await;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose name starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn submit_build(&self, service: &ServiceName, _source_dir: &Path) -> Result<String, ManagerError> {
        self.record(format!("submit_build {service}"));
        if self.script().submit_fails {
            return Err(failure("builds submit"));
        }
        Ok(BUILD_ID.to_string())
    }

    async fn build_status(&self, build_id: &str) -> Result<BuildStatus, ManagerError> {
        self.record(format!("build_status {build_id}"));
        self.gate(Hold::BuildStatus).await;
        match self.script().statuses.pop_front() {
            Some(Some(status)) => Ok(status),
            Some(None) => Err(failure("builds describe")),
            None => Ok(BuildStatus::Working),
        }
    }

    async fn cancel_build(&self, build_id: &str) -> Result<(), ManagerError> {
        self.record(format!("cancel_build {build_id}"));
        Ok(())
    }

    async fn deploy_service(
        &self,
        service: &ServiceName,
        on_line: Option<LineSink<'_>>,
    ) -> Result<CommandOutput, ManagerError> {
        self.record(format!("deploy_service {service}"));
        self.gate(Hold::Deploy).await;
        let (lines, fails) = {
            let script = self.script();
            (script.deploy_lines.clone(), script.deploy_fails)
        };
        if let Some(sink) = on_line {
            for (stream, text) in lines {
                sink(OutputLine { stream, text });
            }
        }
        if fails {
            return Err(failure("run deploy"));
        }
        Ok(CommandOutput::default())
    }

    async fn scale_service(
        &self,
        service: &ServiceName,
        min_instances: u32,
        max_instances: u32,
    ) -> Result<CommandOutput, ManagerError> {
        self.record(format!("scale_service {service} {min_instances} {max_instances}"));
        if self.script().scale_fails {
            return Err(failure("run services update"));
        }
        Ok(CommandOutput {
            stdout: format!("Service [{service}] updated\n"),
            stderr: String::new(),
        })
    }

    async fn delete_service(&self, service: &ServiceName) -> Result<(), ManagerError> {
        self.record(format!("delete_service {service}"));
        if self.script().delete_fails {
            return Err(failure("run services delete"));
        }
        Ok(())
    }

    async fn service_ready(&self, service: &ServiceName) -> Result<bool, ManagerError> {
        self.record(format!("service_ready {service}"));
        self.gate(Hold::Ready).await;
        self.script().ready.ok_or_else(|| failure("run services describe"))
    }

    async fn service_logs(&self, service: &ServiceName, limit: usize) -> Result<Vec<String>, ManagerError> {
        self.record(format!("service_logs {service} {limit}"));
        Ok(vec!["Bot is running...".to_string()])
    }
}

/// A bots root in a temp dir wired to a fake platform
pub struct Harness {
    pub tmp: TempDir,
    pub platform: Arc<FakePlatform>,
    pub workspace: BotWorkspace,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub async fn new(script: Script) -> Self {
        Self::with_options(script, OrchestratorOptions::default()).await
    }

    pub async fn with_options(script: Script, options: OrchestratorOptions) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(tmp.path().join("bots")).await.unwrap();
        let platform = Arc::new(FakePlatform::new(script));
        let state = AppState::with_platform(sandbox, platform.clone(), options, 1024);

        Self {
            tmp,
            platform,
            workspace: state.workspace,
            orchestrator: state.orchestrator,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.orchestrator.bus().subscribe()
    }
}

/// Everything currently queued on the receiver
pub fn drain(rx: &mut broadcast::Receiver<BotEvent>) -> Vec<BotEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// `(status, progress)` of every status event, in order
pub fn statuses(events: &[BotEvent]) -> Vec<(String, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            BotEvent::DeploymentStatus(s) => Some((s.status.to_string(), s.progress)),
            _ => None,
        })
        .collect()
}

/// `(kind, message)` of every log event, in order
pub fn logs(events: &[BotEvent]) -> Vec<(LogKind, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            BotEvent::Log(l) => Some((l.kind, l.message.clone())),
            _ => None,
        })
        .collect()
}
