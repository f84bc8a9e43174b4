use std::collections::HashSet;

use landrush_shared::{ClanTerritorySummary, LatLng, QuestKind, ServerEvent};
use tracing::warn;

use crate::config::{CLAN_BASE_RADIUS_M, CLAN_EXPANSION_START_RADIUS_M, MIN_CLAIM_AREA_M2};
use crate::error::ClaimError;
use crate::geometry;
use crate::quests::{self, QuestOutcome};
use crate::state::AppState;
use crate::store;

use super::{
    InfluenceRule, PersistedVictims, emit_quest_events, emit_shield_broken, load_victims,
    persist_victims, resolve_combat,
};

struct Committed {
    display_name: String,
    clan_summary: ClanTerritorySummary,
    victims: PersistedVictims,
    new_total_area: f64,
    area_claimed: f64,
    quest_outcome: QuestOutcome,
    cleared_trail: bool,
}

/// Resolve a clan-mode claim. A single-point trail with no clan base yet
/// creates the base circle (leader only); anything else is an expansion.
pub async fn resolve_clan_claim(
    state: &AppState,
    player_id: &str,
    points: Vec<LatLng>,
) -> Result<(), ClaimError> {
    let mut attempt = 0;
    loop {
        match attempt_claim(state, player_id, &points).await {
            Err(e) if e.is_retryable() && attempt == 0 => {
                attempt += 1;
                warn!(player_id, error = %e, "clan claim hit a retryable database error; retrying once");
            }
            Err(e) => return Err(e),
            Ok(committed) => {
                emit_outcome(state, player_id, committed).await;
                return Ok(());
            }
        }
    }
}

async fn attempt_claim(
    state: &AppState,
    player_id: &str,
    points: &[LatLng],
) -> Result<Committed, ClaimError> {
    let display_name = state
        .players
        .get(player_id)
        .map(|session| session.display_name.clone())
        .ok_or_else(|| ClaimError::rejected("join the game before claiming"))?;

    let mut tx = state.db.begin().await?;
    let Some(clan) = store::clan_of_player_for_update(&mut tx, player_id).await? else {
        return Err(ClaimError::rejected("join a clan before claiming in clan mode"));
    };

    match clan.base {
        None => {
            if clan.leader_id != player_id {
                return Err(ClaimError::rejected("only the clan leader can set the base"));
            }
            let [center] = points else {
                return Err(ClaimError::rejected(
                    "clan base is claimed from a single point",
                ));
            };
            let circle = geometry::to_multi(
                geometry::circle_polygon(*center, CLAN_BASE_RADIUS_M)
                    .map_err(|e| ClaimError::rejected(e.to_string()))?,
            );

            let solo_blockers = store::find_intersecting(&mut tx, &circle, player_id).await?;
            let clan_blockers =
                store::find_intersecting_clans(&mut tx, &circle, Some(clan.id)).await?;
            if !solo_blockers.is_empty() || !clan_blockers.is_empty() {
                return Err(ClaimError::rejected(
                    "cannot place the clan base inside existing territory",
                ));
            }

            store::set_clan_base(&mut tx, clan.id, *center).await?;
            let area = store::insert_clan_territory(&mut tx, clan.id, &circle).await?;
            let quest_outcome =
                quests::record(&mut tx, player_id, QuestKind::CoverArea, area).await?;
            tx.commit().await?;

            Ok(Committed {
                display_name,
                clan_summary: ClanTerritorySummary {
                    clan_id: clan.id.to_string(),
                    name: clan.name,
                    tag: clan.tag,
                    area_m2: area,
                    geometry: geometry::encode_rings(&circle),
                },
                victims: PersistedVictims {
                    solo_summaries: Vec::new(),
                    clan_summaries: Vec::new(),
                    shield_broken_owners: Vec::new(),
                },
                new_total_area: area,
                area_claimed: area,
                quest_outcome,
                cleared_trail: false,
            })
        }
        Some(base) => {
            let polygon =
                geometry::close_trail(points).map_err(|e| ClaimError::rejected(e.to_string()))?;
            let new_poly = geometry::to_multi(polygon);
            let new_area = geometry::area_m2(&new_poly);
            if new_area < MIN_CLAIM_AREA_M2 {
                return Err(ClaimError::rejected(format!(
                    "claimed area is below the {MIN_CLAIM_AREA_M2} m\u{b2} minimum"
                )));
            }
            let start = points[0];
            if geometry::distance_m(start, base) > CLAN_EXPANSION_START_RADIUS_M {
                return Err(ClaimError::rejected(format!(
                    "clan expansion must start within {CLAN_EXPANSION_START_RADIUS_M} m of the base"
                )));
            }

            let Some(clan_territory) =
                store::load_clan_territory_for_update(&mut tx, clan.id).await?
            else {
                return Err(ClaimError::rejected("clan has no territory to expand"));
            };
            if !geometry::intersects(&new_poly, &clan_territory.geometry) {
                return Err(ClaimError::rejected(
                    "expansion must connect to the clan territory",
                ));
            }

            let members: HashSet<String> = store::clan_member_ids(&mut tx, clan.id)
                .await?
                .into_iter()
                .collect();
            let loaded =
                load_victims(&mut tx, &new_poly, player_id, Some(clan.id), &members).await?;

            let outcome = resolve_combat(
                &clan_territory.geometry,
                &new_poly,
                loaded.states.clone(),
                InfluenceRule::TotalInfluence,
            )
            .map_err(|_| ClaimError::rejected("claim nullified by protected territories"))?;

            let persisted = persist_victims(&mut tx, &loaded, &outcome.victims).await?;
            let total_area =
                store::replace_clan_territory(&mut tx, clan.id, &outcome.attacker_final).await?;

            let mut quest_outcome =
                quests::record(&mut tx, player_id, QuestKind::CoverArea, new_area).await?;
            let trail_km = geometry::trail_length_m(points) / 1000.0;
            let run_outcome =
                quests::record(&mut tx, player_id, QuestKind::RunTrail, trail_km).await?;
            quest_outcome.progress.extend(run_outcome.progress);
            quest_outcome.completed.extend(run_outcome.completed);
            tx.commit().await?;

            Ok(Committed {
                display_name,
                clan_summary: ClanTerritorySummary {
                    clan_id: clan.id.to_string(),
                    name: clan.name,
                    tag: clan.tag,
                    area_m2: total_area,
                    geometry: geometry::encode_rings(&outcome.attacker_final),
                },
                victims: persisted,
                new_total_area: total_area,
                area_claimed: new_area,
                quest_outcome,
                cleared_trail: true,
            })
        }
    }
}

async fn emit_outcome(state: &AppState, player_id: &str, committed: Committed) {
    state.observability.record_claim_committed();
    if committed.cleared_trail {
        state.trails.finish_run(state, player_id, true).await;
    }
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
    let mut clans = vec![committed.clan_summary];
    clans.extend(committed.victims.clan_summaries);
    state.broadcast(ServerEvent::BatchTerritoryUpdate {
        updates: committed.victims.solo_summaries,
        clans,
    });
    emit_quest_events(state, player_id, &committed.quest_outcome);
}
