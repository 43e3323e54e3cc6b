//! Server state

use std::sync::Arc;

use tokio::sync::watch;

use crate::bots::BotWorkspace;
use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub workspace: BotWorkspace,
    pub orchestrator: Arc<Orchestrator>,
    closing: watch::Sender<bool>,
}

impl ServerState {
    pub fn new(workspace: BotWorkspace, orchestrator: Arc<Orchestrator>) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            workspace,
            orchestrator,
            closing,
        }
    }

    /// End every open event stream so graceful shutdown can drain
    pub fn close_streams(&self) {
        self.closing.send_replace(true);
    }

    /// Resolves once [`close_streams`](Self::close_streams) has been called;
    /// pends forever if the state is dropped first
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.closing.subscribe();
        async move {
            if rx.wait_for(|closing| *closing).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
