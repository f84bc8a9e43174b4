mod clan;
mod combat;
mod solo;

pub use clan::resolve_clan_claim;
pub use combat::{
    CombatNullified, CombatOutcome, InfluenceRule, VictimImpact, VictimKind, VictimState,
    VictimUpdate, resolve_combat,
};
pub use solo::{SoloInput, resolve_solo_claim};

use std::collections::{HashMap, HashSet};

use geo::MultiPolygon;
use landrush_shared::{ClanTerritorySummary, ServerEvent, TerritorySummary, identity_color};
use uuid::Uuid;

use crate::error::ClaimError;
use crate::geometry;
use crate::powers;
use crate::quests::QuestOutcome;
use crate::state::AppState;
use crate::store::{self, ClanTerritoryRow, PgTransaction, TerritoryRow};

/// Victims of one claim, read FOR UPDATE, plus the loaded rows for
/// summarizing after the combat result is persisted.
pub(crate) struct LoadedVictims {
    pub states: Vec<VictimState>,
    pub solo_rows: HashMap<String, TerritoryRow>,
    pub clan_rows: HashMap<Uuid, ClanTerritoryRow>,
}

/// Lock every territory intersecting `region`, skipping the attacker, the
/// attacker's own clan and any explicitly friendly owners. A clan-level
/// shield on a victim clan rejects the whole claim with no state change.
pub(crate) async fn load_victims(
    tx: &mut PgTransaction,
    region: &MultiPolygon<f64>,
    exclude_owner: &str,
    exclude_clan: Option<Uuid>,
    skip_owners: &HashSet<String>,
) -> Result<LoadedVictims, ClaimError> {
    let mut states = Vec::new();
    let mut solo_rows = HashMap::new();
    let mut clan_rows = HashMap::new();

    for row in store::find_intersecting(tx, region, exclude_owner).await? {
        if skip_owners.contains(&row.owner_id) {
            continue;
        }
        states.push(VictimState {
            key: row.owner_id.clone(),
            kind: VictimKind::Solo,
            display_name: row.display_name.clone(),
            geometry: row.geometry.clone(),
            shield_active: row.shield_active,
        });
        solo_rows.insert(row.owner_id.clone(), row);
    }

    for row in store::find_intersecting_clans(tx, region, exclude_clan).await? {
        if row.shield {
            return Err(ClaimError::rejected(format!(
                "cannot claim here: clan {} has an active shield",
                row.name
            )));
        }
        states.push(VictimState {
            key: row.clan_id.to_string(),
            kind: VictimKind::Clan,
            display_name: row.name.clone(),
            geometry: row.geometry.clone(),
            shield_active: false,
        });
        clan_rows.insert(row.clan_id, row);
    }

    Ok(LoadedVictims {
        states,
        solo_rows,
        clan_rows,
    })
}

/// Updated summaries for every touched victim, plus the solo victims whose
/// shield was consumed by this claim.
pub(crate) struct PersistedVictims {
    pub solo_summaries: Vec<TerritorySummary>,
    pub clan_summaries: Vec<ClanTerritorySummary>,
    pub shield_broken_owners: Vec<String>,
}

/// Write every victim update inside the claim transaction. Shield-broken
/// solo victims have their last stand consumed here, in the same
/// transaction that recorded the hit.
pub(crate) async fn persist_victims(
    tx: &mut PgTransaction,
    loaded: &LoadedVictims,
    updates: &[VictimUpdate],
) -> Result<PersistedVictims, ClaimError> {
    let mut persisted = PersistedVictims {
        solo_summaries: Vec::new(),
        clan_summaries: Vec::new(),
        shield_broken_owners: Vec::new(),
    };

    for update in updates {
        match update.kind {
            VictimKind::Solo => {
                let Some(row) = loaded.solo_rows.get(&update.key) else {
                    continue;
                };
                let shield_broken = update.impact == VictimImpact::ShieldBroken;
                let area = if shield_broken {
                    // Geometry untouched; only the shield state changes.
                    row.area_m2
                } else {
                    store::replace_territory(tx, &update.key, &update.geometry).await?
                };
                if shield_broken {
                    powers::consume(tx, &update.key, landrush_shared::PowerKind::LastStand)
                        .await
                        .map_err(|e| match e {
                            crate::error::PowerError::Db(db) => ClaimError::Db(db),
                            crate::error::PowerError::Store(store) => ClaimError::Store(store),
                            other => ClaimError::rejected(other.to_string()),
                        })?;
                    persisted.shield_broken_owners.push(update.key.clone());
                }
                persisted.solo_summaries.push(TerritorySummary {
                    owner_id: update.key.clone(),
                    display_name: row.display_name.clone(),
                    color: Some(identity_color(&update.key)),
                    area_m2: area,
                    geometry: geometry::encode_rings(if shield_broken {
                        &row.geometry
                    } else {
                        &update.geometry
                    }),
                    laps_required: row.laps_required,
                    shield_active: false,
                });
            }
            VictimKind::Clan => {
                let Ok(clan_id) = update.key.parse::<Uuid>() else {
                    continue;
                };
                let Some(row) = loaded.clan_rows.get(&clan_id) else {
                    continue;
                };
                let area = store::replace_clan_territory(tx, clan_id, &update.geometry).await?;
                persisted.clan_summaries.push(ClanTerritorySummary {
                    clan_id: update.key.clone(),
                    name: row.name.clone(),
                    tag: row.tag.clone(),
                    area_m2: area,
                    geometry: geometry::encode_rings(&update.geometry),
                });
            }
        }
    }

    Ok(persisted)
}

/// Fan out quest results once the owning transaction has committed.
pub(crate) fn emit_quest_events(state: &AppState, player_id: &str, outcome: &QuestOutcome) {
    for progress in &outcome.progress {
        state.send_to(
            player_id,
            ServerEvent::QuestProgressUpdate {
                quest_id: progress.quest_id.to_string(),
                current: progress.current,
                target: progress.target,
            },
        );
    }
    for win in &outcome.completed {
        state.broadcast(ServerEvent::QuestCompleted {
            quest_id: win.quest_id.to_string(),
            winner_id: win.winner_id.clone(),
        });
    }
}

/// Notify every shield victim after commit.
pub(crate) fn emit_shield_broken(state: &AppState, owners: &[String], attacker_name: &str) {
    for owner in owners {
        state.send_to(
            owner,
            ServerEvent::ShieldBroken {
                attacker_name: attacker_name.to_string(),
            },
        );
    }
}
