//! Build poller tests

use std::sync::Arc;
use std::time::Duration;

use botmgr::deploy::cancel::{cancel_pair, CancelSignal};
use botmgr::deploy::platform::BuildStatus;
use botmgr::deploy::poller::{wait_for_build, PollerOptions};
use botmgr::deploy::store::DeploymentStore;
use botmgr::errors::ManagerError;
use botmgr::events::EventBus;
use botmgr::sandbox::BotIdentity;
use tokio::time::Instant;

use crate::support::{drain, logs, FakePlatform, Hold, Script, BUILD_ID};

fn setup(statuses: Vec<Option<BuildStatus>>) -> (FakePlatform, EventBus, BotIdentity) {
    let platform = FakePlatform::new(Script::default().with_statuses(statuses));
    let bus = EventBus::new(Arc::new(DeploymentStore::new()), 256);
    (platform, bus, BotIdentity::parse("alpha").unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_success_after_four_working_polls() {
    let (platform, bus, id) = setup(vec![
        Some(BuildStatus::Working),
        Some(BuildStatus::Working),
        Some(BuildStatus::Working),
        Some(BuildStatus::Working),
        Some(BuildStatus::Success),
    ]);
    let mut rx = bus.subscribe();

    let started = Instant::now();
    let result = wait_for_build(
        &platform,
        &bus,
        &id,
        BUILD_ID,
        &PollerOptions::default(),
        &mut CancelSignal::never(),
    )
    .await;
    tokio_test::assert_ok!(result);

    assert_eq!(platform.count("build_status"), 5);
    assert_eq!(started.elapsed(), Duration::from_secs(20));

    let messages: Vec<_> = logs(&drain(&mut rx)).into_iter().map(|(_, m)| m).collect();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0], "Build status: WORKING (attempt 1/60)");
    assert_eq!(messages[4], "Build status: SUCCESS (attempt 5/60)");
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_stops_polling() {
    for terminal in [BuildStatus::Failure, BuildStatus::Cancelled, BuildStatus::Timeout] {
        let (platform, bus, id) = setup(vec![Some(BuildStatus::Queued), Some(terminal.clone())]);

        let err = wait_for_build(
            &platform,
            &bus,
            &id,
            BUILD_ID,
            &PollerOptions::default(),
            &mut CancelSignal::never(),
        )
        .await
        .unwrap_err();

        match err {
            ManagerError::BuildTerminal { build_id, status } => {
                assert_eq!(build_id, BUILD_ID);
                assert_eq!(status, terminal.to_string());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(platform.count("build_status"), 2);
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_times_out() {
    let (platform, bus, id) = setup(Vec::new());
    let options = PollerOptions {
        interval: Duration::from_secs(5),
        max_attempts: 3,
    };

    let started = Instant::now();
    let err = wait_for_build(&platform, &bus, &id, BUILD_ID, &options, &mut CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::PollTimeout { attempts: 3, .. }), "{err:?}");
    assert_eq!(platform.count("build_status"), 3);
    // no sleep after the last attempt
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_query_errors_use_up_attempts() {
    let (platform, bus, id) = setup(vec![None, Some(BuildStatus::Other("PENDING".into())), None]);
    let mut rx = bus.subscribe();
    let options = PollerOptions {
        interval: Duration::from_secs(1),
        max_attempts: 3,
    };

    let err = wait_for_build(&platform, &bus, &id, BUILD_ID, &options, &mut CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::PollTimeout { .. }));

    let messages: Vec<_> = logs(&drain(&mut rx)).into_iter().map(|(_, m)| m).collect();
    assert_eq!(
        messages,
        vec![
            "Build status: checking... (attempt 1/3)",
            "Build status: PENDING (attempt 2/3)",
            "Build status: checking... (attempt 3/3)",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_wait() {
    let (platform, bus, id) = setup(Vec::new());
    let (handle, mut signal) = cancel_pair();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let err = wait_for_build(&platform, &bus, &id, BUILD_ID, &PollerOptions::default(), &mut signal)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, ManagerError::Cancelled(_)));
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(platform.count("build_status"), 2);
}

#[tokio::test]
async fn test_cancel_during_status_query_logs_nothing() {
    let (_, bus, id) = setup(Vec::new());
    let platform = FakePlatform::new(Script::holding(Hold::BuildStatus));
    let mut rx = bus.subscribe();
    let (handle, mut signal) = cancel_pair();

    let options = PollerOptions::default();
    let waiting = wait_for_build(&platform, &bus, &id, BUILD_ID, &options, &mut signal);
    let cancelling = async {
        platform.held().await;
        handle.cancel();
        platform.release();
    };
    let (result, ()) = tokio::join!(waiting, cancelling);

    assert!(matches!(result, Err(ManagerError::Cancelled(_))));
    assert_eq!(platform.count("build_status"), 1);
    assert!(logs(&drain(&mut rx)).is_empty());
}
