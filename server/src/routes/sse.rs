use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures::stream::Stream;
use landrush_shared::ServerEvent;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::config::SSE_KEEPALIVE_SECS;
use crate::state::AppState;
use crate::store;

/// Read-only observer feed (dashboards, spectator maps): a snapshot of the
/// current territories, then every public event as it is broadcast.
pub async fn territory_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        if let Some(event) = snapshot_event(&state).await {
            yield Ok(event);
        }

        let rx = state.event_tx.subscribe();
        let mut stream = BroadcastStream::new(rx);

        while let Some(result) = stream.next().await {
            match result {
                Ok(event) => {
                    let Ok(payload) = std::str::from_utf8(&event.json) else {
                        warn!(seq = event.seq, "event payload is not valid utf-8; dropping SSE event");
                        continue;
                    };
                    yield Ok(
                        Event::default()
                            .id(event.seq.to_string())
                            .event("update")
                            .data(payload),
                    );
                }
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "SSE observer lagged behind broadcast buffer; replaying snapshot"
                    );
                    state.observability.record_dropped_broadcast_events(skipped);
                    if let Some(event) = snapshot_event(&state).await {
                        yield Ok(event);
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keep-alive"),
    )
}

async fn snapshot_event(state: &AppState) -> Option<Event> {
    let territories = match store::snapshot_territories(&state.db).await {
        Ok(territories) => territories,
        Err(e) => {
            warn!(error = %e, "failed to load territory snapshot for SSE");
            return None;
        }
    };
    let clans = match store::snapshot_clan_territories(&state.db).await {
        Ok(clans) => clans,
        Err(e) => {
            warn!(error = %e, "failed to load clan snapshot for SSE");
            return None;
        }
    };
    let snapshot = ServerEvent::ExistingTerritories { territories, clans };
    let payload = match serde_json::to_string(&snapshot) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to serialize SSE snapshot");
            return None;
        }
    };
    let seq = state
        .next_seq
        .load(std::sync::atomic::Ordering::Relaxed);
    Some(
        Event::default()
            .id(seq.to_string())
            .event("snapshot")
            .data(payload),
    )
}
