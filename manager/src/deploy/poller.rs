//! Polls a submitted build until it reaches a terminal state

use std::time::Duration;

use tracing::{debug, warn};

use crate::deploy::cancel::CancelSignal;
use crate::deploy::platform::{BuildStatus, Platform};
use crate::errors::ManagerError;
use crate::events::{EventBus, LogKind};
use crate::sandbox::BotIdentity;

/// Build poller options
#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Delay between two status checks
    pub interval: Duration,

    /// Status checks before giving up
    pub max_attempts: u32,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60, // 5 minutes
        }
    }
}

/// Wait for `build_id` to succeed.
///
/// `SUCCESS` resolves, `FAILURE`/`CANCELLED`/`TIMEOUT` fail at once, and
/// anything else (query errors included) uses up one attempt. Every attempt
/// publishes a log line so observers can follow progress.
pub async fn wait_for_build(
    platform: &dyn Platform,
    bus: &EventBus,
    identity: &BotIdentity,
    build_id: &str,
    options: &PollerOptions,
    cancel: &mut CancelSignal,
) -> Result<(), ManagerError> {
    let max_attempts = options.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ManagerError::Cancelled(identity.to_string()));
        }

        let queried = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ManagerError::Cancelled(identity.to_string())),
            queried = platform.build_status(build_id) => queried,
        };

        match queried {
            Ok(status) => {
                bus.publish_log(
                    identity,
                    format!("Build status: {} (attempt {}/{})", status, attempt, max_attempts),
                    LogKind::Info,
                );
                if status == BuildStatus::Success {
                    debug!(bot = %identity, build_id, attempt, "Build succeeded");
                    return Ok(());
                }
                if status.is_failure() {
                    return Err(ManagerError::BuildTerminal {
                        build_id: build_id.to_string(),
                        status: status.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!(bot = %identity, build_id, "Build status query failed: {}", e);
                bus.publish_log(
                    identity,
                    format!("Build status: checking... (attempt {}/{})", attempt, max_attempts),
                    LogKind::Info,
                );
            }
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = tokio::time::sleep(options.interval) => {}
                _ = cancel.cancelled() => {
                    return Err(ManagerError::Cancelled(identity.to_string()));
                }
            }
        }
    }

    Err(ManagerError::PollTimeout {
        build_id: build_id.to_string(),
        attempts: max_attempts,
    })
}
