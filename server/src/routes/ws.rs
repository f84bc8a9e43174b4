use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use landrush_shared::{ClientEvent, ServerEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session;
use crate::state::{AppState, BroadcastEvent};

pub async fn game_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // The first meaningful event must identify the player.
    let (player_id, display_name, mode) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::PlayerJoined {
                    player_id,
                    display_name,
                    mode,
                }) => break (player_id, display_name, mode),
                Ok(_) => debug!("event before playerJoined ignored"),
                Err(e) => debug!(error = %e, "unparseable message before join"),
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "socket error before join");
                return;
            }
        }
    };

    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<Arc<ServerEvent>>();
    match session::join_player(&state, &player_id, &display_name, mode, direct_tx).await {
        Ok(true) => {}
        Ok(false) => {
            // Banned: deliver the queued notice, then drop the connection.
            while let Ok(event) = direct_rx.try_recv() {
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            warn!(player_id, error = %e, "failed to join player");
            let _ = sink.close().await;
            return;
        }
    }

    let mut broadcast_rx = state.event_tx.subscribe();

    // Writer: the per-player queue is drained ahead of the public feed, so
    // e.g. claimSuccessful reaches the claimer before the matching
    // batchTerritoryUpdate. A receiver that lags simply skips events.
    let writer_state = state.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                direct = direct_rx.recv() => {
                    let Some(event) = direct else { break };
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                public = broadcast_rx.recv() => {
                    match public {
                        Ok(BroadcastEvent { json, .. }) => {
                            let Ok(payload) = std::str::from_utf8(&json) else {
                                warn!("broadcast payload is not valid utf-8; dropping");
                                continue;
                            };
                            if sink.send(Message::Text(payload.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            writer_state
                                .observability
                                .record_dropped_broadcast_events(skipped);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    // Reader: inbound events of this connection dispatch strictly in order.
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => session::handle_event(&state, &player_id, event).await,
                Err(e) => debug!(player_id, error = %e, "unparseable client event"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(player_id, error = %e, "socket error");
                break;
            }
        }
    }

    writer.abort();
    session::disconnect_player(&state, &player_id).await;
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(json.into())).await
}
