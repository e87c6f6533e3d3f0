/// Live event stream (SSE)
///
/// Subscribes the caller to the in-process event bus, filtered to their
/// tenant. Lagging clients silently skip missed events; the bus never
/// blocks on slow consumers.

use crate::api::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/api/{tenant}/events", get(stream_events))
}

/// GET /api/{tenant}/events
async fn stream_events(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("📣 Event stream opened for tenant {}", tenant);

    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) => event,
            // Lagged receiver: drop the gap and keep streaming
            Err(_) => return None,
        };
        if event.tenant != tenant {
            return None;
        }
        let sse = Event::default().event(event.event);
        match sse.json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!("⚠️ Could not serialize event {}: {}", event.event, e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
