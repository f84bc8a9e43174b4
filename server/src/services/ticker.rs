use std::time::Duration;

use landrush_shared::{PlayerMode, PlayerPosition, ServerEvent};

use crate::config::POSITION_TICK_SECS;
use crate::state::AppState;

/// Fixed-interval broadcaster of lightweight position snapshots. Ghost
/// runners and spectators stay off the map.
pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(POSITION_TICK_SECS));
    loop {
        interval.tick().await;

        let players: Vec<PlayerPosition> = state
            .players
            .iter()
            .filter(|entry| entry.value().connected)
            .filter(|entry| entry.value().mode != PlayerMode::Spectator)
            .filter(|entry| !entry.value().powers.ghost_runner)
            .filter_map(|entry| {
                let session = entry.value();
                session.position.map(|location| PlayerPosition {
                    player_id: session.player_id.clone(),
                    location,
                    mode: session.mode,
                })
            })
            .collect();

        if players.is_empty() {
            continue;
        }
        state.broadcast(ServerEvent::PlayerPositions { players });
    }
}
