use std::collections::HashSet;

use landrush_shared::{
    BaseClaim, LatLng, PowerKind, QuestKind, ServerEvent, TerritorySummary, identity_color,
};
use tracing::warn;

use crate::config::{BASE_CLAIM_RADIUS_M, MIN_CLAIM_AREA_M2};
use crate::error::{ClaimError, PowerError};
use crate::geometry;
use crate::powers;
use crate::quests::{self, QuestOutcome};
use crate::state::AppState;
use crate::store;

use super::{
    InfluenceRule, PersistedVictims, emit_quest_events, emit_shield_broken, load_victims,
    persist_victims, resolve_combat,
};

#[derive(Debug, Clone)]
pub enum SoloInput {
    Base(BaseClaim),
    Trail(Vec<LatLng>),
}

struct Committed {
    display_name: String,
    attacker_summary: TerritorySummary,
    victims: PersistedVictims,
    new_total_area: f64,
    area_claimed: f64,
    quest_outcome: QuestOutcome,
    cleared_trail: bool,
    used_infiltrator: bool,
}

enum Outcome {
    Committed(Committed),
    /// The infiltrator circle hit a shield: the shield consumption has
    /// already committed, the claim itself is rejected.
    InfiltratorBlocked {
        display_name: String,
        victim_id: String,
        victim_summary: TerritorySummary,
    },
}

/// Resolve a solo claim end to end: one transaction, retried at most once
/// on deadlock, broadcasts only after commit.
pub async fn resolve_solo_claim(
    state: &AppState,
    player_id: &str,
    input: SoloInput,
) -> Result<(), ClaimError> {
    let mut attempt = 0;
    loop {
        match attempt_claim(state, player_id, &input).await {
            Err(e) if e.is_retryable() && attempt == 0 => {
                attempt += 1;
                warn!(player_id, error = %e, "solo claim hit a retryable database error; retrying once");
            }
            Err(e) => return Err(e),
            Ok(outcome) => {
                emit_outcome(state, player_id, outcome).await;
                return Ok(());
            }
        }
    }
}

async fn attempt_claim(
    state: &AppState,
    player_id: &str,
    input: &SoloInput,
) -> Result<Outcome, ClaimError> {
    let (display_name, infiltrator_active) = {
        let session = state
            .players
            .get(player_id)
            .ok_or_else(|| ClaimError::rejected("join the game before claiming"))?;
        (session.display_name.clone(), session.powers.infiltrator)
    };

    match input {
        SoloInput::Base(base) if infiltrator_active => {
            infiltrator_base(state, player_id, &display_name, *base).await
        }
        SoloInput::Base(base) => fresh_base(state, player_id, &display_name, *base).await,
        SoloInput::Trail(points) => expansion(state, player_id, &display_name, points).await,
    }
}

fn attacker_summary(
    player_id: &str,
    display_name: &str,
    area_m2: f64,
    geometry: &geo::MultiPolygon<f64>,
    laps_required: i32,
    shield_active: bool,
) -> TerritorySummary {
    TerritorySummary {
        owner_id: player_id.to_string(),
        display_name: display_name.to_string(),
        color: Some(identity_color(player_id)),
        area_m2,
        geometry: crate::geometry::encode_rings(geometry),
        laps_required,
        shield_active,
    }
}

fn power_to_claim(error: PowerError) -> ClaimError {
    match error {
        PowerError::Db(db) => ClaimError::Db(db),
        PowerError::Store(store) => ClaimError::Store(store),
        other => ClaimError::rejected(other.to_string()),
    }
}

async fn fresh_base(
    state: &AppState,
    player_id: &str,
    display_name: &str,
    base: BaseClaim,
) -> Result<Outcome, ClaimError> {
    let radius = base.radius.unwrap_or(BASE_CLAIM_RADIUS_M);
    let center = LatLng::new(base.lat, base.lng);
    let circle = geometry::to_multi(
        geometry::circle_polygon(center, radius)
            .map_err(|e| ClaimError::rejected(e.to_string()))?,
    );

    let mut tx = state.db.begin().await?;
    let attacker = store::load_for_update(&mut tx, player_id).await?;
    if attacker
        .as_ref()
        .is_some_and(|row| !geometry::is_empty(&row.geometry))
    {
        return Err(ClaimError::rejected(
            "you already have territory; expand from it instead",
        ));
    }

    let solo_blockers = store::find_intersecting(&mut tx, &circle, player_id).await?;
    let clan_blockers = store::find_intersecting_clans(&mut tx, &circle, None).await?;
    if !solo_blockers.is_empty() || !clan_blockers.is_empty() {
        return Err(ClaimError::rejected(
            "cannot claim a base inside existing territory",
        ));
    }

    let area =
        store::upsert_initial(&mut tx, player_id, display_name, &circle, Some(center)).await?;
    let quest_outcome = quests::record(&mut tx, player_id, QuestKind::CoverArea, area).await?;
    tx.commit().await?;

    let (laps_required, shield_active) = attacker
        .map(|row| (row.laps_required, row.shield_active))
        .unwrap_or((1, false));
    Ok(Outcome::Committed(Committed {
        display_name: display_name.to_string(),
        attacker_summary: attacker_summary(
            player_id,
            display_name,
            area,
            &circle,
            laps_required,
            shield_active,
        ),
        victims: PersistedVictims {
            solo_summaries: Vec::new(),
            clan_summaries: Vec::new(),
            shield_broken_owners: Vec::new(),
        },
        new_total_area: area,
        area_claimed: area,
        quest_outcome,
        cleared_trail: false,
        used_infiltrator: false,
    }))
}

async fn infiltrator_base(
    state: &AppState,
    player_id: &str,
    display_name: &str,
    base: BaseClaim,
) -> Result<Outcome, ClaimError> {
    let radius = base.radius.unwrap_or(BASE_CLAIM_RADIUS_M);
    let center = LatLng::new(base.lat, base.lng);
    let circle = geometry::to_multi(
        geometry::circle_polygon(center, radius)
            .map_err(|e| ClaimError::rejected(e.to_string()))?,
    );

    let mut tx = state.db.begin().await?;
    let attacker = store::load_for_update(&mut tx, player_id).await?;

    let clan_victims = store::find_intersecting_clans(&mut tx, &circle, None).await?;
    if !clan_victims.is_empty() {
        return Err(ClaimError::rejected(
            "infiltrator base cannot target clan territory",
        ));
    }
    let mut victims = store::find_intersecting(&mut tx, &circle, player_id).await?;
    if victims.len() != 1 || !geometry::contains_polygon(&victims[0].geometry, &circle) {
        return Err(ClaimError::rejected(
            "infiltrator base must sit fully inside a single territory",
        ));
    }
    let victim = victims.remove(0);

    if victim.shield_active {
        // The shield soaks the infiltration: consume it, commit that, and
        // reject the claim itself.
        powers::consume(&mut tx, &victim.owner_id, PowerKind::LastStand)
            .await
            .map_err(power_to_claim)?;
        tx.commit().await?;
        let victim_summary = TerritorySummary {
            owner_id: victim.owner_id.clone(),
            display_name: victim.display_name.clone(),
            color: Some(identity_color(&victim.owner_id)),
            area_m2: victim.area_m2,
            geometry: geometry::encode_rings(&victim.geometry),
            laps_required: victim.laps_required,
            shield_active: false,
        };
        return Ok(Outcome::InfiltratorBlocked {
            display_name: display_name.to_string(),
            victim_id: victim.owner_id,
            victim_summary,
        });
    }

    let (remaining, victim_area) =
        store::difference_out(&mut tx, &victim.owner_id, &circle).await?;

    let attacker_existing = attacker
        .as_ref()
        .map(|row| row.geometry.clone())
        .unwrap_or_else(geometry::empty);
    let attacker_final = geometry::union(&attacker_existing, &circle);
    let total_area =
        store::upsert_initial(&mut tx, player_id, display_name, &attacker_final, Some(center))
            .await?;
    store::set_carve_mode(&mut tx, player_id, true).await?;

    let circle_area = geometry::area_m2(&circle);
    let quest_outcome = quests::record(&mut tx, player_id, QuestKind::CoverArea, circle_area).await?;
    tx.commit().await?;

    let victim_summary = TerritorySummary {
        owner_id: victim.owner_id.clone(),
        display_name: victim.display_name.clone(),
        color: Some(identity_color(&victim.owner_id)),
        area_m2: victim_area,
        geometry: geometry::encode_rings(&remaining),
        laps_required: victim.laps_required,
        shield_active: false,
    };
    let (laps_required, shield_active) = attacker
        .map(|row| (row.laps_required, row.shield_active))
        .unwrap_or((1, false));
    Ok(Outcome::Committed(Committed {
        display_name: display_name.to_string(),
        attacker_summary: attacker_summary(
            player_id,
            display_name,
            total_area,
            &attacker_final,
            laps_required,
            shield_active,
        ),
        victims: PersistedVictims {
            solo_summaries: vec![victim_summary],
            clan_summaries: Vec::new(),
            shield_broken_owners: Vec::new(),
        },
        new_total_area: total_area,
        area_claimed: circle_area,
        quest_outcome,
        cleared_trail: false,
        used_infiltrator: true,
    }))
}

async fn expansion(
    state: &AppState,
    player_id: &str,
    display_name: &str,
    points: &[LatLng],
) -> Result<Outcome, ClaimError> {
    let polygon =
        geometry::close_trail(points).map_err(|e| ClaimError::rejected(e.to_string()))?;
    let new_poly = geometry::to_multi(polygon);
    let new_area = geometry::area_m2(&new_poly);
    if new_area < MIN_CLAIM_AREA_M2 {
        return Err(ClaimError::rejected(format!(
            "claimed area is below the {MIN_CLAIM_AREA_M2} m\u{b2} minimum"
        )));
    }

    let mut tx = state.db.begin().await?;
    let Some(attacker) = store::load_for_update(&mut tx, player_id).await? else {
        return Err(ClaimError::rejected("claim a base before expanding"));
    };
    if geometry::is_empty(&attacker.geometry) {
        return Err(ClaimError::rejected("claim a base before expanding"));
    }
    if !geometry::intersects(&new_poly, &attacker.geometry) {
        return Err(ClaimError::rejected(
            "expansion must connect to your territory",
        ));
    }

    let own_clan = store::clan_id_of_player(&mut tx, player_id).await?;
    let loaded = load_victims(&mut tx, &new_poly, player_id, own_clan, &HashSet::new()).await?;

    let rule = if attacker.carve_mode {
        InfluenceRule::NewPolygonOnly
    } else {
        InfluenceRule::TotalInfluence
    };
    let outcome = resolve_combat(&attacker.geometry, &new_poly, loaded.states.clone(), rule)
        .map_err(|_| ClaimError::rejected("claim nullified by protected territories"))?;

    let persisted = persist_victims(&mut tx, &loaded, &outcome.victims).await?;
    let total_area = store::replace_territory(&mut tx, player_id, &outcome.attacker_final).await?;
    if attacker.carve_mode {
        store::set_carve_mode(&mut tx, player_id, false).await?;
    }

    let mut quest_outcome = quests::record(&mut tx, player_id, QuestKind::CoverArea, new_area).await?;
    let trail_km = geometry::trail_length_m(points) / 1000.0;
    let run_outcome = quests::record(&mut tx, player_id, QuestKind::RunTrail, trail_km).await?;
    quest_outcome.progress.extend(run_outcome.progress);
    quest_outcome.completed.extend(run_outcome.completed);
    tx.commit().await?;

    Ok(Outcome::Committed(Committed {
        display_name: display_name.to_string(),
        attacker_summary: attacker_summary(
            player_id,
            display_name,
            total_area,
            &outcome.attacker_final,
            attacker.laps_required,
            attacker.shield_active,
        ),
        victims: persisted,
        new_total_area: total_area,
        area_claimed: new_area,
        quest_outcome,
        cleared_trail: true,
        used_infiltrator: false,
    }))
}

async fn emit_outcome(state: &AppState, player_id: &str, outcome: Outcome) {
    match outcome {
        Outcome::InfiltratorBlocked {
            display_name,
            victim_id,
            victim_summary,
        } => {
            state.observability.record_claim_rejected();
            if let Some(mut session) = state.players.get_mut(player_id) {
                session.powers.infiltrator = false;
            }
            state.send_to(
                player_id,
                ServerEvent::ClaimRejected {
                    reason: "blocked by a last stand shield".to_string(),
                },
            );
            emit_shield_broken(state, std::slice::from_ref(&victim_id), &display_name);
            state.broadcast(ServerEvent::BatchTerritoryUpdate {
                updates: vec![victim_summary],
                clans: Vec::new(),
            });
        }
        Outcome::Committed(committed) => {
            state.observability.record_claim_committed();
            if committed.used_infiltrator {
                if let Some(mut session) = state.players.get_mut(player_id) {
                    session.powers.infiltrator = false;
                }
            }
            if committed.cleared_trail {
                state.trails.finish_run(state, player_id, true).await;
            }
            // The claimer hears about success before the public update.
            state.send_to(
                player_id,
                ServerEvent::ClaimSuccessful {
                    new_total_area_m2: committed.new_total_area,
                    area_claimed_m2: committed.area_claimed,
                },
            );
            emit_shield_broken(
                state,
                &committed.victims.shield_broken_owners,
                &committed.display_name,
            );
            let mut updates = vec![committed.attacker_summary];
            updates.extend(committed.victims.solo_summaries);
            state.broadcast(ServerEvent::BatchTerritoryUpdate {
                updates,
                clans: committed.victims.clan_summaries,
            });
            emit_quest_events(state, player_id, &committed.quest_outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use landrush_shared::{ClanTerritorySummary, ServerEvent};
    use sqlx::postgres::PgPoolOptions;
    use tokio::sync::mpsc;

    use crate::session::{PlayerSession, RunPowerFlags};
    use crate::state::BroadcastEvent;
    use landrush_shared::PlayerMode;

    const DEG_PER_M: f64 = 1.0 / 111_320.0;
    const DB_LOCK_KEY: i64 = 41_200_907;

    fn square_points(origin_lat_m: f64, origin_lng_m: f64, side_m: f64) -> Vec<LatLng> {
        let lat = origin_lat_m * DEG_PER_M;
        let lng = origin_lng_m * DEG_PER_M;
        let d = side_m * DEG_PER_M;
        vec![
            LatLng::new(lat, lng),
            LatLng::new(lat, lng + d),
            LatLng::new(lat + d, lng + d),
            LatLng::new(lat + d, lng),
        ]
    }

    fn register_session(
        state: &AppState,
        player_id: &str,
        name: &str,
    ) -> mpsc::UnboundedReceiver<Arc<ServerEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.players.insert(
            player_id.to_string(),
            PlayerSession {
                player_id: player_id.to_string(),
                display_name: name.to_string(),
                mode: PlayerMode::Solo,
                color: identity_color(player_id),
                position: None,
                powers: RunPowerFlags::default(),
                direct: tx,
                connected: true,
            },
        );
        rx
    }

    fn drain_direct(rx: &mut mpsc::UnboundedReceiver<Arc<ServerEvent>>) -> Vec<Arc<ServerEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn drain_broadcast(
        rx: &mut tokio::sync::broadcast::Receiver<BroadcastEvent>,
    ) -> Vec<Arc<ServerEvent>> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event);
        }
        events
    }

    fn batch_updates(events: &[Arc<ServerEvent>]) -> Vec<(Vec<TerritorySummary>, Vec<ClanTerritorySummary>)> {
        events
            .iter()
            .filter_map(|event| match event.as_ref() {
                ServerEvent::BatchTerritoryUpdate { updates, clans } => {
                    Some((updates.clone(), clans.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn solo_claim_scenarios_with_real_postgres() {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("Skipping real-Postgres claim test: DATABASE_URL is not set");
            return;
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("connect real postgres");
        let mut lock_conn = pool.acquire().await.expect("acquire lock connection");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(DB_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .expect("acquire claim test db lock");
        crate::db_migrations::run(&pool).await.expect("run migrations");
        sqlx::query(
            "TRUNCATE TABLE territories, clans, clan_members, clan_territories, \
             geofence_zones, superpower_chests, quests, quest_progress, power_orders",
        )
        .execute(&pool)
        .await
        .expect("truncate game tables");

        let state = AppState::new(pool.clone());
        let mut alice_rx = register_session(&state, "alice", "Alice");
        let mut bob_rx = register_session(&state, "bob", "Bob");
        let mut carol_rx = register_session(&state, "carol", "Carol");
        let mut broadcast_rx = state.event_tx.subscribe();

        // A cover-area quest the first base claim will win outright.
        let quest_id = store::create_quest(
            &pool,
            "cover_area",
            2_000.0,
            Utc::now() + chrono::TimeDelta::hours(1),
        )
        .await
        .expect("create quest");

        // Scenario 1: first base claim of radius 30 m.
        resolve_solo_claim(
            &state,
            "alice",
            SoloInput::Base(BaseClaim {
                lng: 0.0,
                lat: 0.0,
                radius: None,
            }),
        )
        .await
        .expect("first base claim succeeds");

        let alice_row = store::load_territory(&pool, "alice")
            .await
            .expect("load alice")
            .expect("alice exists");
        let expected_circle = std::f64::consts::PI * 30.0 * 30.0;
        assert!(
            (alice_row.area_m2 / expected_circle - 1.0).abs() < 0.01,
            "base area {}",
            alice_row.area_m2
        );
        assert!(
            (geometry::area_m2(&alice_row.geometry) - alice_row.area_m2).abs() < 1.0,
            "stored area must match the geometry"
        );

        let direct = drain_direct(&mut alice_rx);
        assert!(direct.iter().any(|event| matches!(
            event.as_ref(),
            ServerEvent::ClaimSuccessful { .. }
        )));
        let broadcasts = drain_broadcast(&mut broadcast_rx);
        let batches = batch_updates(&broadcasts);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0.len(), 1);
        assert_eq!(batches[0].0[0].owner_id, "alice");
        assert!(broadcasts.iter().any(|event| matches!(
            event.as_ref(),
            ServerEvent::QuestCompleted { quest_id: id, winner_id } if *id == quest_id.to_string() && winner_id == "alice"
        )));

        // A duplicate base claim is a policy rejection with no state change.
        let duplicate = resolve_solo_claim(
            &state,
            "alice",
            SoloInput::Base(BaseClaim {
                lng: 0.0,
                lat: 0.0,
                radius: None,
            }),
        )
        .await;
        assert!(duplicate.is_err());

        // Scenario 3 setup: Bob owns a 100 m square 100 m east of Alice.
        {
            let mut tx = pool.begin().await.expect("begin");
            let bob_square = geometry::to_multi(
                geometry::close_trail(&square_points(0.0, 100.0, 100.0)).expect("bob square"),
            );
            store::upsert_initial(
                &mut tx,
                "bob",
                "Bob",
                &bob_square,
                Some(LatLng::new(50.0 * DEG_PER_M, 150.0 * DEG_PER_M)),
            )
            .await
            .expect("insert bob");
            tx.commit().await.expect("commit bob");
        }
        let bob_before = store::load_territory(&pool, "bob")
            .await
            .expect("load bob")
            .expect("bob exists")
            .area_m2;
        assert!((bob_before - 10_000.0).abs() < 20.0, "bob area {bob_before}");

        // Alice expands over the western half of Bob's square.
        resolve_solo_claim(
            &state,
            "alice",
            SoloInput::Trail(square_points(0.0, 20.0, 130.0)),
        )
        .await
        .expect("expansion succeeds");

        let bob_after = store::load_territory(&pool, "bob")
            .await
            .expect("load bob")
            .expect("bob exists");
        let lost = bob_before - bob_after.area_m2;
        assert!((lost - 5_000.0).abs() < 30.0, "bob lost {lost}");
        assert!(
            (geometry::area_m2(&bob_after.geometry) - bob_after.area_m2).abs() < 1.0,
            "bob stored area must match his geometry"
        );
        let broadcasts = drain_broadcast(&mut broadcast_rx);
        let batches = batch_updates(&broadcasts);
        assert_eq!(batches.len(), 1);
        let owners: Vec<&str> = batches[0].0.iter().map(|t| t.owner_id.as_str()).collect();
        assert!(owners.contains(&"alice") && owners.contains(&"bob"));
        assert!(drain_direct(&mut bob_rx).is_empty(), "unshielded bob gets no direct event");

        // Scenario 4: Carol is shielded; her land survives as an island.
        {
            let mut tx = pool.begin().await.expect("begin");
            let carol_square = geometry::to_multi(
                geometry::close_trail(&square_points(0.0, -200.0, 100.0)).expect("carol square"),
            );
            store::upsert_initial(
                &mut tx,
                "carol",
                "Carol",
                &carol_square,
                Some(LatLng::new(50.0 * DEG_PER_M, -150.0 * DEG_PER_M)),
            )
            .await
            .expect("insert carol");
            tx.commit().await.expect("commit carol");
        }
        sqlx::query(
            "UPDATE territories SET shield_owned = TRUE, shield_active = TRUE, \
             shield_activated_at = NOW(), superpowers = '{\"owned\":[\"lastStand\"]}' \
             WHERE owner_id = 'carol'",
        )
        .execute(&pool)
        .await
        .expect("arm carol shield");
        let carol_before = store::load_territory(&pool, "carol")
            .await
            .expect("load carol")
            .expect("carol exists");

        let alice_before_shielded_hit = store::load_territory(&pool, "alice")
            .await
            .expect("load alice")
            .expect("alice exists")
            .area_m2;

        resolve_solo_claim(
            &state,
            "alice",
            SoloInput::Trail(square_points(0.0, -150.0, 140.0)),
        )
        .await
        .expect("shielded expansion succeeds");

        let carol_after = store::load_territory(&pool, "carol")
            .await
            .expect("load carol")
            .expect("carol exists");
        assert!(
            (carol_after.area_m2 - carol_before.area_m2).abs() < 1.0,
            "shielded geometry is unchanged"
        );
        assert!(!carol_after.shield_active && !carol_after.shield_owned);
        let carol_powers: serde_json::Value =
            sqlx::query_scalar("SELECT superpowers FROM territories WHERE owner_id = 'carol'")
                .fetch_one(&pool)
                .await
                .expect("carol powers");
        assert_eq!(carol_powers["owned"], serde_json::json!([]));

        let carol_events = drain_direct(&mut carol_rx);
        assert!(carol_events.iter().any(|event| matches!(
            event.as_ref(),
            ServerEvent::ShieldBroken { attacker_name } if attacker_name == "Alice"
        )));

        // Area conservation under shield: the attacker gains only what lies
        // outside the shielded island.
        let alice_after = store::load_territory(&pool, "alice")
            .await
            .expect("load alice")
            .expect("alice exists");
        let gained = alice_after.area_m2 - alice_before_shielded_hit;
        // 140 m square (~19 600 m²) minus the 100 m shielded overlap
        // (~5 600 m²) minus what alice already held under the new polygon.
        assert!(gained > 0.0);
        assert!(
            !geometry::intersects(&alice_after.geometry, &carol_after.geometry)
                || geometry::area_m2(&geometry::intersection(
                    &alice_after.geometry,
                    &carol_after.geometry
                )) < 1.0,
            "alice must not cover the shielded island"
        );

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(DB_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .expect("release claim test db lock");
    }
}
