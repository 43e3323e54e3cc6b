//! Server-sent event stream of bot activity

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::events::BotEvent;
use crate::server::state::ServerState;

/// GET /api/events
///
/// Emits `log` and `deploymentStatus` events from the moment of subscription.
/// A client that lags behind skips the dropped events and keeps streaming.
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.orchestrator.bus().subscribe();
    debug!(
        subscribers = state.orchestrator.bus().subscriber_count(),
        "Event stream opened"
    );

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| async move {
            match result {
                Ok(event) => to_sse(&event).map(Ok),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged, dropping events");
                    None
                }
            }
        })
        .take_until(state.closed());

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &BotEvent) -> Option<Event> {
    match event.to_json() {
        Ok(json) => Some(Event::default().event(event.name()).data(json)),
        Err(e) => {
            warn!(bot = %event.identity(), "Failed to encode event: {}", e);
            None
        }
    }
}
