//! Deploy pipeline and lifecycle operation tests

use std::time::Duration;

use botmgr::deploy::orchestrator::OrchestratorOptions;
use botmgr::deploy::platform::BuildStatus;
use botmgr::deploy::poller::PollerOptions;
use botmgr::deploy::status::DeploymentStatus;
use botmgr::errors::ManagerError;
use botmgr::events::LogKind;
use botmgr::runner::LineStream;
use botmgr::sandbox::BotIdentity;

use crate::support::{drain, logs, statuses, Harness, Hold, Script, BUILD_ID};

fn alpha() -> BotIdentity {
    BotIdentity::parse("alpha").unwrap()
}

fn s(status: &str, progress: u8) -> (String, u8) {
    (status.to_string(), progress)
}

async fn harness_with_bot(script: Script) -> Harness {
    let h = Harness::new(script).await;
    h.workspace.create("alpha").await.unwrap();
    h
}

// ================================= DEPLOY ===================================== //

#[tokio::test(start_paused = true)]
async fn test_deploy_success_ends_running() {
    let script = Script {
        deploy_lines: vec![
            (LineStream::Stdout, "Deploying container to Cloud Run service".to_string()),
            (LineStream::Stderr, "Creating Revision...".to_string()),
            (LineStream::Stderr, "ERROR: transient quota warning".to_string()),
        ],
        ..Script::default()
    };
    let h = harness_with_bot(script).await;
    let mut rx = h.subscribe();

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    assert_eq!(ticket.service_name.as_str(), "alpha-bot");
    assert!(h.orchestrator.is_deploying(&alpha()));
    ticket.handle.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        statuses(&events),
        vec![s("deploying", 0), s("deploying", 20), s("deploying", 60), s("running", 100)]
    );

    let log_lines = logs(&events);
    assert!(log_lines.contains(&(LogKind::Output, "Deploying container to Cloud Run service".to_string())));
    assert!(log_lines.contains(&(LogKind::Output, "Creating Revision...".to_string())));
    assert!(log_lines.contains(&(LogKind::Error, "ERROR: transient quota warning".to_string())));
    assert_eq!(log_lines.last().unwrap(), &(LogKind::Success, "Bot deployed successfully".to_string()));

    let entry = h.orchestrator.bus().store().status(&alpha());
    assert_eq!(entry.status, DeploymentStatus::Running);
    assert_eq!(entry.progress, 100);
    assert_eq!(entry.build_id.as_deref(), Some(BUILD_ID));
    assert!(!h.orchestrator.is_deploying(&alpha()));

    assert_eq!(
        h.platform.calls(),
        vec![
            "submit_build alpha-bot".to_string(),
            format!("build_status {BUILD_ID}"),
            "deploy_service alpha-bot".to_string(),
            "service_ready alpha-bot".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_submit_failure_never_deploys() {
    let h = harness_with_bot(Script {
        submit_fails: true,
        ..Script::default()
    })
    .await;
    let mut rx = h.subscribe();

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    ticket.handle.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(statuses(&events), vec![s("deploying", 0), s("failed", 0)]);
    assert_eq!(h.platform.count("deploy_service"), 0);
    assert_eq!(h.platform.count("build_status"), 0);

    let (kind, message) = logs(&events).pop().unwrap();
    assert_eq!(kind, LogKind::Error);
    assert!(message.starts_with("Deployment failed:"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn test_poll_exhaustion_fails_without_deploy() {
    let options = OrchestratorOptions {
        poller: PollerOptions {
            interval: Duration::from_secs(5),
            max_attempts: 4,
        },
        ..OrchestratorOptions::default()
    };
    let h = Harness::with_options(Script::never_finishing(), options).await;
    h.workspace.create("alpha").await.unwrap();
    let mut rx = h.subscribe();

    h.orchestrator.deploy("alpha").await.unwrap().handle.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(statuses(&events), vec![s("deploying", 0), s("deploying", 20), s("failed", 0)]);
    assert_eq!(h.platform.count("build_status"), 4);
    assert_eq!(h.platform.count("deploy_service"), 0);

    let (kind, message) = logs(&events).pop().unwrap();
    assert_eq!(kind, LogKind::Error);
    assert!(message.contains("did not finish after 4 status checks"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn test_build_failure_fails_without_deploy() {
    let h = harness_with_bot(
        Script::default().with_statuses([Some(BuildStatus::Working), Some(BuildStatus::Failure)]),
    )
    .await;

    h.orchestrator.deploy("alpha").await.unwrap().handle.await.unwrap();

    assert_eq!(h.orchestrator.bus().store().status(&alpha()).status, DeploymentStatus::Failed);
    assert_eq!(h.platform.count("deploy_service"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_command_failure() {
    let h = harness_with_bot(Script {
        deploy_fails: true,
        ..Script::default()
    })
    .await;
    let mut rx = h.subscribe();

    h.orchestrator.deploy("alpha").await.unwrap().handle.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(statuses(&events).last().unwrap(), &s("failed", 0));
    assert_eq!(h.platform.count("service_ready"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_service_ends_stopped() {
    for ready in [Some(false), None] {
        let h = harness_with_bot(Script {
            ready,
            ..Script::default()
        })
        .await;
        let mut rx = h.subscribe();

        h.orchestrator.deploy("alpha").await.unwrap().handle.await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(statuses(&events).last().unwrap(), &s("stopped", 0), "ready = {ready:?}");
        assert!(!statuses(&events).contains(&s("running", 100)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_settle_delay_precedes_readiness_check() {
    let h = harness_with_bot(Script::default()).await;
    let started = tokio::time::Instant::now();

    h.orchestrator.deploy("alpha").await.unwrap().handle.await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_deploy_rejects_before_side_effects() {
    let h = Harness::new(Script::default()).await;
    let mut rx = h.subscribe();

    let err = h.orchestrator.deploy("../etc").await.unwrap_err();
    assert!(matches!(err, ManagerError::ValidationError(_)));

    let err = h.orchestrator.deploy("ghost").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound(_)));

    assert!(drain(&mut rx).is_empty());
    assert!(h.orchestrator.bus().store().is_empty());
    assert!(h.platform.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_deploys_are_single_flight() {
    let h = harness_with_bot(Script::default()).await;

    let first = h.orchestrator.deploy("alpha").await.unwrap();
    let err = h.orchestrator.deploy("alpha").await.unwrap_err();
    assert!(matches!(err, ManagerError::DeployInProgress(ref id) if id == "alpha"));

    first.handle.await.unwrap();

    // the rejected request changed nothing; the first pipeline's outcome stands
    let entry = h.orchestrator.bus().store().status(&alpha());
    assert_eq!((entry.status, entry.progress), (DeploymentStatus::Running, 100));
    assert_eq!(h.platform.count("submit_build"), 1);

    // once finished, the bot can be deployed again
    let second = h.orchestrator.deploy("alpha").await.unwrap();
    assert_ne!(second.run_id, first.run_id);
    second.handle.await.unwrap();
    assert_eq!(h.platform.count("submit_build"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_different_bots_deploy_concurrently() {
    let h = harness_with_bot(Script::default().with_statuses([
        Some(BuildStatus::Success),
        Some(BuildStatus::Success),
    ]))
    .await;
    h.workspace.create("beta").await.unwrap();

    let a = h.orchestrator.deploy("alpha").await.unwrap();
    let b = h.orchestrator.deploy("beta").await.unwrap();
    a.handle.await.unwrap();
    b.handle.await.unwrap();

    let names: Vec<_> = h
        .orchestrator
        .statuses()
        .into_iter()
        .map(|(id, entry)| (id.to_string(), entry.status))
        .collect();
    assert_eq!(
        names,
        vec![
            ("alpha".to_string(), DeploymentStatus::Running),
            ("beta".to_string(), DeploymentStatus::Running),
        ]
    );
}

// ================================= CANCEL ===================================== //

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_observing_and_cancels_build() {
    let h = harness_with_bot(Script::never_finishing()).await;
    let mut rx = h.subscribe();

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.orchestrator.bus().store().status(&alpha()).progress, 20);

    h.orchestrator.cancel("alpha").await.unwrap();
    assert!(!h.orchestrator.is_deploying(&alpha()));
    ticket.handle.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(statuses(&events).last().unwrap(), &s("failed", 0));
    assert_eq!(h.platform.count(&format!("cancel_build {BUILD_ID}")), 1);
    assert_eq!(h.platform.count("deploy_service"), 0);

    // nothing published after the cancel
    let log_lines = logs(&events);
    assert_eq!(log_lines.last().unwrap(), &(LogKind::Error, "Deployment cancelled".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_deploy_command_publishes_nothing_further() {
    let h = harness_with_bot(Script {
        deploy_lines: vec![(LineStream::Stdout, "Creating revision...".to_string())],
        ..Script::holding(Hold::Deploy)
    })
    .await;
    let mut rx = h.subscribe();

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    h.platform.held().await;
    h.orchestrator.cancel("alpha").await.unwrap();
    h.platform.release();
    ticket.handle.await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(statuses(&events).last().unwrap(), &s("failed", 0));
    let log_lines = logs(&events);
    assert_eq!(log_lines.last().unwrap(), &(LogKind::Error, "Deployment cancelled".to_string()));
    assert!(!log_lines.iter().any(|(_, m)| m == "Creating revision..."));
    assert_eq!(h.platform.count("service_ready"), 0);
    assert_eq!(h.orchestrator.bus().store().status(&alpha()).status, DeploymentStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_readiness_check_keeps_failed() {
    let h = harness_with_bot(Script::holding(Hold::Ready)).await;
    let mut rx = h.subscribe();

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    h.platform.held().await;
    h.orchestrator.cancel("alpha").await.unwrap();
    h.platform.release();
    ticket.handle.await.unwrap();

    let entry = h.orchestrator.bus().store().status(&alpha());
    assert_eq!((entry.status, entry.progress), (DeploymentStatus::Failed, 0));
    let events = drain(&mut rx);
    assert_eq!(statuses(&events).last().unwrap(), &s("failed", 0));
    assert!(!statuses(&events).contains(&s("running", 100)));

    // the slot is free and a fresh deploy owns the bot again
    assert!(!h.orchestrator.is_deploying(&alpha()));
    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    h.platform.held().await;
    h.platform.release();
    ticket.handle.await.unwrap();
    assert_eq!(h.orchestrator.bus().store().status(&alpha()).status, DeploymentStatus::Running);
}

#[tokio::test]
async fn test_cancel_without_pipeline_is_local_only() {
    let h = harness_with_bot(Script::default()).await;

    h.orchestrator.cancel("alpha").await.unwrap();

    assert_eq!(h.orchestrator.bus().store().status(&alpha()).status, DeploymentStatus::Failed);
    assert!(h.platform.calls().is_empty());
}

// ============================== STOP / RESTART ================================ //

#[tokio::test]
async fn test_stop_and_restart_transitions() {
    let h = harness_with_bot(Script::default()).await;
    let mut rx = h.subscribe();

    let output = h.orchestrator.stop("alpha").await.unwrap();
    assert!(output.stdout.contains("alpha-bot"));
    h.orchestrator.restart("alpha").await.unwrap();

    assert_eq!(
        statuses(&drain(&mut rx)),
        vec![s("stopping", 0), s("stopped", 0), s("restarting", 0), s("running", 100)]
    );
    assert_eq!(
        h.platform.calls(),
        vec!["scale_service alpha-bot 0 0", "scale_service alpha-bot 0 1"]
    );
}

#[tokio::test]
async fn test_stop_failure_surfaces_error_and_fails() {
    let h = harness_with_bot(Script {
        scale_fails: true,
        ..Script::default()
    })
    .await;
    let mut rx = h.subscribe();

    let err = h.orchestrator.stop("alpha").await.unwrap_err();
    assert!(matches!(err, ManagerError::ExternalCommand { code: Some(1), .. }));

    let events = drain(&mut rx);
    assert_eq!(statuses(&events), vec![s("stopping", 0), s("failed", 0)]);
    assert!(logs(&events).contains(&(
        LogKind::Output,
        "ERROR: run services update rejected".to_string()
    )));
}

#[tokio::test(start_paused = true)]
async fn test_stop_rejected_while_deploying() {
    let h = harness_with_bot(Script::never_finishing()).await;
    let _ticket = h.orchestrator.deploy("alpha").await.unwrap();

    let err = h.orchestrator.stop("alpha").await.unwrap_err();
    assert!(matches!(err, ManagerError::DeployInProgress(_)));
    let err = h.orchestrator.restart("alpha").await.unwrap_err();
    assert!(matches!(err, ManagerError::DeployInProgress(_)));
    assert_eq!(h.platform.count("scale_service"), 0);
}

// ================================= DELETE ===================================== //

#[tokio::test(start_paused = true)]
async fn test_delete_clears_store_even_when_platform_fails() {
    let h = harness_with_bot(Script {
        delete_fails: true,
        ..Script::default()
    })
    .await;
    h.orchestrator.deploy("alpha").await.unwrap().handle.await.unwrap();
    assert!(h.orchestrator.bus().store().get(&alpha()).is_some());
    let mut rx = h.subscribe();

    h.orchestrator.delete("alpha").await.unwrap();

    assert!(h.orchestrator.bus().store().get(&alpha()).is_none());
    assert!(!h.tmp.path().join("bots/alpha").exists());
    assert_eq!(statuses(&drain(&mut rx)), vec![s("not-deployed", 0)]);
    assert_eq!(h.platform.count("delete_service alpha-bot"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_detaches_running_pipeline() {
    let h = harness_with_bot(Script::never_finishing()).await;

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.orchestrator.delete("alpha").await.unwrap();
    ticket.handle.await.unwrap();

    assert!(h.orchestrator.bus().store().get(&alpha()).is_none());
    assert!(!h.orchestrator.is_deploying(&alpha()));
    assert_eq!(h.platform.count("deploy_service"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_readiness_check_leaves_no_entry() {
    let h = harness_with_bot(Script::holding(Hold::Ready)).await;

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    h.platform.held().await;
    h.orchestrator.delete("alpha").await.unwrap();
    assert!(h.orchestrator.bus().store().get(&alpha()).is_none());
    let mut rx = h.subscribe();

    h.platform.release();
    ticket.handle.await.unwrap();

    assert!(h.orchestrator.bus().store().get(&alpha()).is_none());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_deploy_command_leaves_no_entry() {
    let h = harness_with_bot(Script::holding(Hold::Deploy)).await;

    let ticket = h.orchestrator.deploy("alpha").await.unwrap();
    h.platform.held().await;
    h.orchestrator.delete("alpha").await.unwrap();
    let mut rx = h.subscribe();

    h.platform.release();
    ticket.handle.await.unwrap();

    assert!(h.orchestrator.bus().store().get(&alpha()).is_none());
    assert!(drain(&mut rx).is_empty());
    assert_eq!(h.platform.count("service_ready"), 0);
}

#[tokio::test]
async fn test_lifecycle_operations_require_existing_bot() {
    let h = Harness::new(Script::default()).await;

    let err = h.orchestrator.cancel("ghost").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound(_)));
    let err = h.orchestrator.stop("ghost").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound(_)));
    let err = h.orchestrator.restart("ghost").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound(_)));

    assert!(h.orchestrator.statuses().is_empty());
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = Harness::new(Script::default()).await;
    h.orchestrator.bus().publish_status(&alpha(), DeploymentStatus::Failed, 0);

    h.orchestrator.delete("alpha").await.unwrap();
    h.orchestrator.delete("alpha").await.unwrap();
    assert!(h.orchestrator.bus().store().get(&alpha()).is_none());

    let err = h.orchestrator.delete("..").await.unwrap_err();
    assert!(matches!(err, ManagerError::ValidationError(_)));
}

#[tokio::test]
async fn test_service_logs_go_through_platform() {
    let h = harness_with_bot(Script::default()).await;
    let lines = h.orchestrator.service_logs("alpha", 50).await.unwrap();
    assert_eq!(lines, vec!["Bot is running..."]);
    assert_eq!(h.platform.calls(), vec!["service_logs alpha-bot 50"]);
}
