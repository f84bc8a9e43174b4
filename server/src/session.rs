use std::sync::Arc;

use chrono::Utc;
use landrush_shared::{
    ClientEvent, LatLng, PlayerMode, PowerKind, ServerEvent, identity_color,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::claim::{self, SoloInput};
use crate::error::{ClaimError, PowerError};
use crate::powers;
use crate::state::AppState;
use crate::store;

/// Run-scoped power flags. Cleared when the run ends, however it ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunPowerFlags {
    pub ghost_runner: bool,
    pub trail_defense: bool,
    pub infiltrator: bool,
}

/// One connected (or grace-period) player. Owned by the session hub;
/// engines reach it through the registry by id, never via back-pointers.
#[derive(Debug)]
pub struct PlayerSession {
    pub player_id: String,
    pub display_name: String,
    pub mode: PlayerMode,
    pub color: (u8, u8, u8),
    pub position: Option<LatLng>,
    pub powers: RunPowerFlags,
    pub direct: mpsc::UnboundedSender<Arc<ServerEvent>>,
    pub connected: bool,
}

/// Register or rebind a session. Returns false when the account is banned;
/// the ban notice has then already been queued on `direct`.
pub async fn join_player(
    state: &AppState,
    player_id: &str,
    display_name: &str,
    mode: PlayerMode,
    direct: mpsc::UnboundedSender<Arc<ServerEvent>>,
) -> Result<bool, crate::error::StoreError> {
    if let Some(until) = store::load_banned_until(&state.db, player_id).await? {
        if until > Utc::now() {
            let _ = direct.send(Arc::new(ServerEvent::AccountBanned { until: Some(until) }));
            return Ok(false);
        }
    }

    if mode != PlayerMode::Spectator {
        store::ensure_player_row(&state.db, player_id, display_name).await?;
    }

    match state.players.get_mut(player_id) {
        Some(mut session) => {
            // Reconnect within the disconnect grace window.
            session.display_name = display_name.to_string();
            session.mode = mode;
            session.direct = direct.clone();
            session.connected = true;
        }
        None => {
            state.players.insert(
                player_id.to_string(),
                PlayerSession {
                    player_id: player_id.to_string(),
                    display_name: display_name.to_string(),
                    mode,
                    color: identity_color(player_id),
                    position: None,
                    powers: RunPowerFlags::default(),
                    direct: direct.clone(),
                    connected: true,
                },
            );
        }
    }

    seed_existing(state, mode, &direct).await?;
    Ok(true)
}

/// Send the territories of the session's mode to a fresh connection.
async fn seed_existing(
    state: &AppState,
    mode: PlayerMode,
    direct: &mpsc::UnboundedSender<Arc<ServerEvent>>,
) -> Result<(), crate::error::StoreError> {
    let territories = match mode {
        PlayerMode::Solo | PlayerMode::Spectator => store::snapshot_territories(&state.db).await?,
        PlayerMode::Clan => Vec::new(),
    };
    let clans = match mode {
        PlayerMode::Clan | PlayerMode::Spectator => {
            store::snapshot_clan_territories(&state.db).await?
        }
        PlayerMode::Solo => Vec::new(),
    };
    let _ = direct.send(Arc::new(ServerEvent::ExistingTerritories { territories, clans }));
    Ok(())
}

/// Connection closed: flag the session and let the trail engine decide
/// between immediate removal and the drawing grace window.
pub async fn disconnect_player(state: &AppState, player_id: &str) {
    if let Some(mut session) = state.players.get_mut(player_id) {
        session.connected = false;
    }
    state.trails.disconnect(state, player_id).await;
}

/// Dispatch one inbound event. Events of a single connection arrive here
/// strictly in order.
pub async fn handle_event(state: &AppState, player_id: &str, event: ClientEvent) {
    match event {
        ClientEvent::PlayerJoined { .. } => {
            debug!(player_id, "duplicate playerJoined ignored");
        }
        ClientEvent::LocationUpdate { lat, lng } => {
            handle_location(state, player_id, LatLng::new(lat, lng)).await;
        }
        ClientEvent::StartDrawingTrail => {
            if let Err(reason) = state.trails.start_drawing(state, player_id).await {
                debug!(player_id, reason, "start drawing refused");
            }
        }
        ClientEvent::StopDrawingTrail => {
            state.trails.finish_run(state, player_id, true).await;
        }
        ClientEvent::ClaimTerritory {
            mode,
            trail,
            base_claim,
        } => {
            handle_claim(state, player_id, mode, trail, base_claim).await;
        }
        ClientEvent::ActivateLastStand => {
            activate_power(state, player_id, PowerKind::LastStand).await;
        }
        ClientEvent::ActivateGhostRunner => {
            activate_power(state, player_id, PowerKind::GhostRunner).await;
        }
        ClientEvent::ActivateInfiltrator => {
            activate_power(state, player_id, PowerKind::Infiltrator).await;
        }
        ClientEvent::ActivateTrailDefense => {
            activate_power(state, player_id, PowerKind::TrailDefense).await;
        }
        ClientEvent::CreateArena { target_owner_id } => {
            if let Err(e) = state
                .conquests
                .create_arena(state, player_id, &target_owner_id)
                .await
            {
                send_conquest_failure(state, player_id, e);
            }
        }
        ClientEvent::StartConquest => {
            if let Err(e) = state.conquests.start_conquest(state, player_id) {
                send_conquest_failure(state, player_id, e);
            }
        }
        ClientEvent::RecordLap { path } => {
            if let Err(e) = state.conquests.record_lap(state, player_id, path).await {
                send_conquest_failure(state, player_id, e);
            }
        }
    }
}

/// Location feed: always refresh the position snapshot; gameplay (trail
/// growth, arena entry) only happens inside the geofence.
async fn handle_location(state: &AppState, player_id: &str, point: LatLng) {
    match state.players.get_mut(player_id) {
        Some(mut session) => session.position = Some(point),
        None => return,
    }
    if !state.geofence.is_valid(point.lat, point.lng).await {
        debug!(player_id, "location outside the allowed zones; ignored for gameplay");
        return;
    }
    state.conquests.handle_position(state, player_id, point);
    state.trails.append_point(state, player_id, point).await;
}

async fn handle_claim(
    state: &AppState,
    player_id: &str,
    mode: PlayerMode,
    trail: Option<Vec<LatLng>>,
    base_claim: Option<landrush_shared::BaseClaim>,
) {
    let result = match mode {
        PlayerMode::Spectator => Err(ClaimError::rejected("spectators cannot claim territory")),
        PlayerMode::Solo => match (base_claim, claim_trail(state, player_id, trail).await) {
            (Some(base), _) => {
                claim::resolve_solo_claim(state, player_id, SoloInput::Base(base)).await
            }
            (None, Some(points)) => {
                claim::resolve_solo_claim(state, player_id, SoloInput::Trail(points)).await
            }
            (None, None) => Err(ClaimError::rejected("claim needs a trail or a base point")),
        },
        PlayerMode::Clan => match claim_trail(state, player_id, trail).await {
            Some(points) => claim::resolve_clan_claim(state, player_id, points).await,
            None => Err(ClaimError::rejected("claim needs a trail")),
        },
    };

    if let Err(e) = result {
        state.observability.record_claim_rejected();
        let reason = match e.user_reason() {
            Some(reason) => reason.to_string(),
            None => {
                let correlation_id = Uuid::new_v4();
                state.observability.record_persist_failure();
                warn!(player_id, %correlation_id, error = %e, "claim failed internally");
                "internal error".to_string()
            }
        };
        state.send_to(player_id, ServerEvent::ClaimRejected { reason });
    }
}

/// The server-side trail is authoritative when one is in progress; the
/// payload trail is accepted otherwise (e.g. right after a reconnect).
async fn claim_trail(
    state: &AppState,
    player_id: &str,
    payload: Option<Vec<LatLng>>,
) -> Option<Vec<LatLng>> {
    match state.trails.trail_points(player_id).await {
        Some(points) if !points.is_empty() => Some(points),
        _ => payload,
    }
}

async fn activate_power(state: &AppState, player_id: &str, power: PowerKind) {
    match powers::activate(&state.db, player_id, power, Utc::now()).await {
        Ok(()) => {
            if let Some(mut session) = state.players.get_mut(player_id) {
                match power {
                    PowerKind::GhostRunner => session.powers.ghost_runner = true,
                    PowerKind::TrailDefense => session.powers.trail_defense = true,
                    PowerKind::Infiltrator => session.powers.infiltrator = true,
                    PowerKind::LastStand => {}
                }
            }
            state.trails.set_run_flag(player_id, power).await;
            state.send_to(player_id, ServerEvent::SuperpowerAcknowledged { power });
        }
        Err(PowerError::Db(e)) => {
            let correlation_id = Uuid::new_v4();
            state.observability.record_persist_failure();
            warn!(player_id, %correlation_id, error = %e, "power activation failed internally");
            state.send_to(
                player_id,
                ServerEvent::ClaimRejected {
                    reason: "internal error".to_string(),
                },
            );
        }
        Err(e) => {
            state.send_to(
                player_id,
                ServerEvent::ClaimRejected {
                    reason: format!("cannot activate {}: {e}", power.as_str()),
                },
            );
        }
    }
}

fn send_conquest_failure(state: &AppState, player_id: &str, error: crate::error::ConquestError) {
    let reason = match error.user_reason() {
        Some(reason) => reason.to_string(),
        None => {
            let correlation_id = Uuid::new_v4();
            state.observability.record_persist_failure();
            warn!(player_id, %correlation_id, error = %error, "conquest operation failed internally");
            "internal error".to_string()
        }
    };
    state.send_to(player_id, ServerEvent::ConquestFailed { reason });
}
