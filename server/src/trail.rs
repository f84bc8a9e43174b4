use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use landrush_shared::{LatLng, PlayerMode, PowerKind, QuestKind, ServerEvent};
use rand::prelude::*;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::config::{CHEST_PICKUP_RADIUS_M, DISCONNECT_GRACE_SECS};
use crate::error::{PowerError, StoreError};
use crate::geometry;
use crate::powers;
use crate::quests::{self, QuestOutcome};
use crate::state::AppState;
use crate::store;

#[derive(Debug, Clone)]
pub struct ActiveTrail {
    pub player_id: String,
    pub mode: PlayerMode,
    pub points: Vec<LatLng>,
    pub started_at: DateTime<Utc>,
    pub ghost: bool,
    pub trail_defense: bool,
}

/// What one appended segment does to the other drawing players.
#[derive(Debug, Default, PartialEq)]
struct SegmentOutcome {
    cut_victims: Vec<String>,
    attacker_deflected: bool,
}

/// Crossed trails are processed in ascending victim id so a segment that
/// crosses several trails resolves the same way every time. A victim with
/// trail defense ends the attacker's run instead; victims already cut by
/// the same segment stay cut.
fn evaluate_segment(
    trails: &HashMap<String, ActiveTrail>,
    attacker_id: &str,
    prev: LatLng,
    next: LatLng,
) -> SegmentOutcome {
    let mut outcome = SegmentOutcome::default();
    let Some(own) = trails.get(attacker_id) else {
        return outcome;
    };

    let mut crossed: Vec<&ActiveTrail> = trails
        .values()
        .filter(|trail| trail.player_id != attacker_id)
        .filter(|trail| trail.mode == own.mode)
        .filter(|trail| trail.points.len() >= 2)
        .filter(|trail| geometry::segment_crosses_polyline(prev, next, &trail.points))
        .collect();
    crossed.sort_by(|a, b| a.player_id.cmp(&b.player_id));

    for victim in crossed {
        if victim.trail_defense {
            outcome.attacker_deflected = true;
            break;
        }
        outcome.cut_victims.push(victim.player_id.clone());
    }
    outcome
}

/// In-memory per-player draw state. Every mutation goes through the write
/// lock, so trail updates are serialized process-wide.
#[derive(Clone)]
pub struct TrailEngine {
    trails: Arc<RwLock<HashMap<String, ActiveTrail>>>,
}

impl TrailEngine {
    pub fn new() -> Self {
        Self {
            trails: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn is_drawing(&self, player_id: &str) -> bool {
        self.trails.read().await.contains_key(player_id)
    }

    pub async fn trail_points(&self, player_id: &str) -> Option<Vec<LatLng>> {
        self.trails
            .read()
            .await
            .get(player_id)
            .map(|trail| trail.points.clone())
    }

    pub async fn drawing_count(&self) -> usize {
        self.trails.read().await.len()
    }

    /// Begin a run. Spectators cannot draw and a player has at most one
    /// active trail.
    pub async fn start_drawing(&self, state: &AppState, player_id: &str) -> Result<(), String> {
        let (mode, ghost, trail_defense, color) = {
            let session = state
                .players
                .get(player_id)
                .ok_or_else(|| "join the game before drawing".to_string())?;
            (
                session.mode,
                session.powers.ghost_runner,
                session.powers.trail_defense,
                session.color,
            )
        };
        if !mode.can_draw() {
            return Err("spectators cannot draw trails".to_string());
        }

        {
            let mut trails = self.trails.write().await;
            if trails.contains_key(player_id) {
                return Err("a trail is already in progress".to_string());
            }
            trails.insert(
                player_id.to_string(),
                ActiveTrail {
                    player_id: player_id.to_string(),
                    mode,
                    points: Vec::new(),
                    started_at: Utc::now(),
                    ghost,
                    trail_defense,
                },
            );
        }

        if !ghost {
            state.broadcast(ServerEvent::TrailStarted {
                player_id: player_id.to_string(),
                color: Some(color),
            });
        }
        Ok(())
    }

    /// Ingest one valid GPS fix for a drawing player. Ordering within the
    /// call: chest pickup, then cross-trail cuts, then the append, then the
    /// outbound broadcast.
    pub async fn append_point(&self, state: &AppState, player_id: &str, point: LatLng) {
        if !self.is_drawing(player_id).await {
            return;
        }

        self.try_pickup_chest(state, player_id, point).await;

        let (outcome, appended, ghost) = {
            let mut trails = self.trails.write().await;
            let Some(own) = trails.get(player_id) else {
                return;
            };
            let ghost = own.ghost;
            let outcome = match own.points.last().copied() {
                Some(prev) => evaluate_segment(&trails, player_id, prev, point),
                None => SegmentOutcome::default(),
            };

            if outcome.attacker_deflected {
                trails.remove(player_id);
                (outcome, false, ghost)
            } else {
                for victim in &outcome.cut_victims {
                    trails.remove(victim);
                }
                if let Some(own) = trails.get_mut(player_id) {
                    own.points.push(point);
                }
                (outcome, true, ghost)
            }
        };

        if outcome.attacker_deflected {
            self.reset_run_flags(state, player_id);
            state.send_to(
                player_id,
                ServerEvent::RunTerminated {
                    reason: "deflected".to_string(),
                },
            );
            state.broadcast(ServerEvent::TrailCleared {
                player_id: player_id.to_string(),
            });
            return;
        }

        if !outcome.cut_victims.is_empty() {
            let attacker_name = state
                .players
                .get(player_id)
                .map(|session| session.display_name.clone())
                .unwrap_or_else(|| player_id.to_string());
            for victim in &outcome.cut_victims {
                self.reset_run_flags(state, victim);
                state.observability.record_trail_cut();
                state.send_to(
                    victim,
                    ServerEvent::RunTerminated {
                        reason: format!("cut by {attacker_name}"),
                    },
                );
                state.broadcast(ServerEvent::TrailCleared {
                    player_id: victim.clone(),
                });
            }
            self.record_cut_quest(state, player_id, outcome.cut_victims.len() as f64)
                .await;
        }

        if appended && !ghost {
            state.broadcast(ServerEvent::TrailPointAdded {
                player_id: player_id.to_string(),
                point,
            });
        }
    }

    /// End a run: drop the trail and the run-scoped power flags. The armed
    /// last stand shield is untouched; it expires or is consumed in combat.
    pub async fn finish_run(&self, state: &AppState, player_id: &str, announce: bool) {
        let existed = self.trails.write().await.remove(player_id).is_some();
        self.reset_run_flags(state, player_id);
        if existed && announce {
            state.broadcast(ServerEvent::TrailCleared {
                player_id: player_id.to_string(),
            });
        }
    }

    /// Connection dropped. A player who is not drawing goes away at once;
    /// a drawing player gets a grace window to reconnect before the trail
    /// is cleared and the registry entry removed.
    pub async fn disconnect(&self, state: &AppState, player_id: &str) {
        if !self.is_drawing(player_id).await {
            state.players.remove(player_id);
            return;
        }

        let engine = self.clone();
        let state = state.clone();
        let player_id = player_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(DISCONNECT_GRACE_SECS)).await;
            let still_gone = state
                .players
                .get(&player_id)
                .map(|session| !session.connected)
                .unwrap_or(true);
            if still_gone {
                engine.finish_run(&state, &player_id, true).await;
                state.players.remove(&player_id);
            }
        });
    }

    /// A power activated mid-run applies to the trail already in progress.
    pub async fn set_run_flag(&self, player_id: &str, power: PowerKind) {
        if let Some(trail) = self.trails.write().await.get_mut(player_id) {
            match power {
                PowerKind::GhostRunner => trail.ghost = true,
                PowerKind::TrailDefense => trail.trail_defense = true,
                PowerKind::LastStand | PowerKind::Infiltrator => {}
            }
        }
    }

    fn reset_run_flags(&self, state: &AppState, player_id: &str) {
        if let Some(mut session) = state.players.get_mut(player_id) {
            session.powers.ghost_runner = false;
            session.powers.trail_defense = false;
            session.powers.infiltrator = false;
        }
    }

    async fn try_pickup_chest(&self, state: &AppState, player_id: &str, point: LatLng) {
        let chest_id = {
            let chests = state.chests.read().await;
            chests
                .values()
                .find(|chest| {
                    chest.active
                        && geometry::distance_m(chest.location, point) <= CHEST_PICKUP_RADIUS_M
                })
                .map(|chest| chest.id)
        };
        let Some(chest_id) = chest_id else {
            return;
        };

        match claim_chest(state, player_id, chest_id).await {
            Ok(Some(granted)) => {
                if let Some(chest) = state.chests.write().await.get_mut(&chest_id) {
                    chest.active = false;
                }
                state.observability.record_chest_claimed();
                state.broadcast(ServerEvent::ChestClaimed {
                    chest_id: chest_id.to_string(),
                    player_id: player_id.to_string(),
                });
                if !granted.is_empty() {
                    state.send_to(player_id, ServerEvent::SuperpowersGranted { powers: granted });
                }
            }
            Ok(None) => {}
            Err(e) => {
                state.observability.record_persist_failure();
                warn!(player_id, %chest_id, error = %e, "chest pickup failed");
            }
        }
    }

    async fn record_cut_quest(&self, state: &AppState, attacker_id: &str, cuts: f64) {
        let result: Result<QuestOutcome, sqlx::Error> = async {
            let mut tx = state.db.begin().await?;
            let outcome = quests::record(&mut tx, attacker_id, QuestKind::TrailCut, cuts).await?;
            tx.commit().await?;
            Ok(outcome)
        }
        .await;
        match result {
            Ok(outcome) => crate::claim::emit_quest_events(state, attacker_id, &outcome),
            Err(e) => {
                state.observability.record_persist_failure();
                warn!(attacker_id, error = %e, "failed to record trail-cut quest progress");
            }
        }
    }
}

impl Default for TrailEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Deactivate the chest and grant 1-2 random unowned powers in one
/// transaction. Returns None when the chest was already claimed.
async fn claim_chest(
    state: &AppState,
    player_id: &str,
    chest_id: Uuid,
) -> Result<Option<Vec<PowerKind>>, StoreError> {
    let mut tx = state.db.begin().await?;
    if !store::try_claim_chest(&mut tx, chest_id).await? {
        return Ok(None);
    }
    let owned = match powers::load_owned_for_update(&mut tx, player_id).await {
        Ok(owned) => owned,
        Err(PowerError::MissingPlayer) => return Ok(None),
        Err(PowerError::Db(e)) => return Err(e.into()),
        Err(PowerError::Store(e)) => return Err(e),
        Err(_) => return Ok(None),
    };
    let pool = powers::unowned(&owned);
    let selection: Vec<PowerKind> = {
        let mut rng = rand::rng();
        let count = rng.random_range(1..=2usize).min(pool.len());
        pool.choose_multiple(&mut rng, count).copied().collect()
    };
    let granted = match powers::grant_powers_tx(&mut tx, player_id, &selection).await {
        Ok(granted) => granted,
        Err(PowerError::Db(e)) => return Err(e.into()),
        Err(PowerError::Store(e)) => return Err(e),
        Err(_) => Vec::new(),
    };
    tx.commit().await?;
    Ok(Some(granted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail(player_id: &str, points: Vec<LatLng>, trail_defense: bool) -> ActiveTrail {
        ActiveTrail {
            player_id: player_id.to_string(),
            mode: PlayerMode::Solo,
            points,
            started_at: Utc::now(),
            ghost: false,
            trail_defense,
        }
    }

    fn crossing_setup(defense: bool) -> HashMap<String, ActiveTrail> {
        let mut trails = HashMap::new();
        trails.insert(
            "attacker".to_string(),
            trail("attacker", vec![LatLng::new(-0.001, 0.0)], false),
        );
        trails.insert(
            "victim".to_string(),
            trail(
                "victim",
                vec![LatLng::new(0.0, -0.001), LatLng::new(0.0, 0.001)],
                defense,
            ),
        );
        trails
    }

    #[test]
    fn crossing_an_undefended_trail_cuts_the_victim() {
        let trails = crossing_setup(false);
        let outcome = evaluate_segment(
            &trails,
            "attacker",
            LatLng::new(-0.001, 0.0),
            LatLng::new(0.001, 0.0),
        );
        assert!(!outcome.attacker_deflected);
        assert_eq!(outcome.cut_victims, vec!["victim".to_string()]);
    }

    #[test]
    fn crossing_a_defended_trail_deflects_the_attacker() {
        let trails = crossing_setup(true);
        let outcome = evaluate_segment(
            &trails,
            "attacker",
            LatLng::new(-0.001, 0.0),
            LatLng::new(0.001, 0.0),
        );
        assert!(outcome.attacker_deflected);
        assert!(outcome.cut_victims.is_empty());
    }

    #[test]
    fn parallel_trails_are_left_alone() {
        let mut trails = crossing_setup(false);
        trails.get_mut("attacker").unwrap().points = vec![LatLng::new(0.001, 0.0)];
        let outcome = evaluate_segment(
            &trails,
            "attacker",
            LatLng::new(0.001, 0.0),
            LatLng::new(0.002, 0.0),
        );
        assert_eq!(outcome, SegmentOutcome::default());
    }

    #[test]
    fn single_point_trails_cannot_be_cut() {
        let mut trails = crossing_setup(false);
        trails.get_mut("victim").unwrap().points = vec![LatLng::new(0.0, 0.0)];
        let outcome = evaluate_segment(
            &trails,
            "attacker",
            LatLng::new(-0.001, 0.0),
            LatLng::new(0.001, 0.0),
        );
        assert!(outcome.cut_victims.is_empty());
    }

    #[test]
    fn other_modes_do_not_interact() {
        let mut trails = crossing_setup(false);
        trails.get_mut("victim").unwrap().mode = PlayerMode::Clan;
        let outcome = evaluate_segment(
            &trails,
            "attacker",
            LatLng::new(-0.001, 0.0),
            LatLng::new(0.001, 0.0),
        );
        assert!(outcome.cut_victims.is_empty());
    }

    #[test]
    fn victims_are_cut_in_ascending_id_order() {
        let mut trails = crossing_setup(false);
        trails.insert(
            "another".to_string(),
            trail(
                "another",
                vec![LatLng::new(0.0002, -0.001), LatLng::new(0.0002, 0.001)],
                false,
            ),
        );
        let outcome = evaluate_segment(
            &trails,
            "attacker",
            LatLng::new(-0.001, 0.0),
            LatLng::new(0.001, 0.0),
        );
        assert_eq!(
            outcome.cut_victims,
            vec!["another".to_string(), "victim".to_string()]
        );
    }
}
