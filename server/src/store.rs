use chrono::{DateTime, Utc};
use geo::MultiPolygon;
use landrush_shared::{
    ClanTerritorySummary, LatLng, MultiPolygonRings, TerritorySummary, identity_color,
};
use sqlx::{PgPool, PgRow, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::StoreError;
use crate::geometry;
use crate::state::Chest;

pub type PgTransaction = Transaction<'static, Postgres>;

/// One locked row of the territories table.
#[derive(Debug, Clone)]
pub struct TerritoryRow {
    pub owner_id: String,
    pub display_name: String,
    pub geometry: MultiPolygon<f64>,
    pub area_m2: f64,
    pub base_point: Option<LatLng>,
    pub shield_owned: bool,
    pub shield_active: bool,
    pub shield_activated_at: Option<DateTime<Utc>>,
    pub carve_mode: bool,
    pub laps_required: i32,
    pub banned_until: Option<DateTime<Utc>>,
}

impl TerritoryRow {
    pub fn summary(&self) -> TerritorySummary {
        TerritorySummary {
            owner_id: self.owner_id.clone(),
            display_name: self.display_name.clone(),
            color: Some(identity_color(&self.owner_id)),
            area_m2: self.area_m2,
            geometry: geometry::encode_rings(&self.geometry),
            laps_required: self.laps_required,
            shield_active: self.shield_active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClanRow {
    pub id: Uuid,
    pub name: String,
    pub tag: String,
    pub leader_id: String,
    pub base: Option<LatLng>,
    pub shield: bool,
}

#[derive(Debug, Clone)]
pub struct ClanTerritoryRow {
    pub clan_id: Uuid,
    pub name: String,
    pub tag: String,
    pub geometry: MultiPolygon<f64>,
    pub area_m2: f64,
    pub shield: bool,
}

impl ClanTerritoryRow {
    pub fn summary(&self) -> ClanTerritorySummary {
        ClanTerritorySummary {
            clan_id: self.clan_id.to_string(),
            name: self.name.clone(),
            tag: self.tag.clone(),
            area_m2: self.area_m2,
            geometry: geometry::encode_rings(&self.geometry),
        }
    }
}

const TERRITORY_COLUMNS: &str = "owner_id, display_name, geometry, area_m2, base_lng, base_lat, \
     shield_owned, shield_active, shield_activated_at, carve_mode, laps_required, banned_until";

fn geometry_to_json(geometry: &MultiPolygon<f64>) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(geometry::encode_rings(geometry)).map_err(StoreError::corrupt)
}

fn geometry_from_json(value: serde_json::Value) -> Result<MultiPolygon<f64>, StoreError> {
    let rings: MultiPolygonRings = serde_json::from_value(value).map_err(StoreError::corrupt)?;
    geometry::decode_rings(&rings).map_err(StoreError::corrupt)
}

fn territory_from_row(row: &PgRow) -> Result<TerritoryRow, StoreError> {
    let base_lng: Option<f64> = row.try_get("base_lng").map_err(StoreError::Db)?;
    let base_lat: Option<f64> = row.try_get("base_lat").map_err(StoreError::Db)?;
    Ok(TerritoryRow {
        owner_id: row.try_get("owner_id").map_err(StoreError::Db)?,
        display_name: row.try_get("display_name").map_err(StoreError::Db)?,
        geometry: geometry_from_json(row.try_get("geometry").map_err(StoreError::Db)?)?,
        area_m2: row.try_get("area_m2").map_err(StoreError::Db)?,
        base_point: match (base_lat, base_lng) {
            (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
            _ => None,
        },
        shield_owned: row.try_get("shield_owned").map_err(StoreError::Db)?,
        shield_active: row.try_get("shield_active").map_err(StoreError::Db)?,
        shield_activated_at: row.try_get("shield_activated_at").map_err(StoreError::Db)?,
        carve_mode: row.try_get("carve_mode").map_err(StoreError::Db)?,
        laps_required: row.try_get("laps_required").map_err(StoreError::Db)?,
        banned_until: row.try_get("banned_until").map_err(StoreError::Db)?,
    })
}

/// Create an empty row on first join so power grants have a target.
pub async fn ensure_player_row(
    pool: &PgPool,
    owner_id: &str,
    display_name: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO territories (owner_id, display_name, geometry, area_m2) \
         VALUES ($1, $2, '[]'::jsonb, 0) \
         ON CONFLICT (owner_id) DO UPDATE SET display_name = EXCLUDED.display_name",
    )
    .bind(owner_id)
    .bind(display_name)
    .execute(pool)
    .await
    .map_err(StoreError::Db)?;
    Ok(())
}

/// Plain read without a row lock, for eligibility checks outside a claim.
pub async fn load_territory(
    pool: &PgPool,
    owner_id: &str,
) -> Result<Option<TerritoryRow>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {TERRITORY_COLUMNS} FROM territories WHERE owner_id = $1"
    ))
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::Db)?;
    row.as_ref().map(territory_from_row).transpose()
}

pub async fn load_for_update(
    tx: &mut PgTransaction,
    owner_id: &str,
) -> Result<Option<TerritoryRow>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {TERRITORY_COLUMNS} FROM territories WHERE owner_id = $1 FOR UPDATE"
    ))
    .bind(owner_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    row.as_ref().map(territory_from_row).transpose()
}

/// Lock and return every non-self territory intersecting `region`, ascending
/// by owner id. Candidates are found without a lock, then the intersecting
/// rows are re-read FOR UPDATE and re-filtered against their locked geometry.
pub async fn find_intersecting(
    tx: &mut PgTransaction,
    region: &MultiPolygon<f64>,
    exclude_owner: &str,
) -> Result<Vec<TerritoryRow>, StoreError> {
    let candidates = sqlx::query(
        "SELECT owner_id, geometry FROM territories WHERE owner_id <> $1 AND area_m2 > 0",
    )
    .bind(exclude_owner)
    .fetch_all(&mut **tx)
    .await
    .map_err(StoreError::Db)?;

    let mut ids: Vec<String> = Vec::new();
    for row in &candidates {
        let geometry = geometry_from_json(row.try_get("geometry").map_err(StoreError::Db)?)?;
        if geometry::intersects(&geometry, region) {
            ids.push(row.try_get("owner_id").map_err(StoreError::Db)?);
        }
    }
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let locked = sqlx::query(&format!(
        "SELECT {TERRITORY_COLUMNS} FROM territories \
         WHERE owner_id = ANY($1) ORDER BY owner_id FOR UPDATE"
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(StoreError::Db)?;

    let mut rows = Vec::with_capacity(locked.len());
    for row in &locked {
        let territory = territory_from_row(row)?;
        if geometry::intersects(&territory.geometry, region) {
            rows.push(territory);
        }
    }
    Ok(rows)
}

/// Replace a territory's geometry; area is recomputed from the geometry so
/// the stored column can never drift. Returns the new area.
pub async fn replace_territory(
    tx: &mut PgTransaction,
    owner_id: &str,
    new_geometry: &MultiPolygon<f64>,
) -> Result<f64, StoreError> {
    let area = geometry::area_m2(new_geometry);
    sqlx::query(
        "UPDATE territories SET geometry = $2, area_m2 = $3, updated_at = NOW() \
         WHERE owner_id = $1",
    )
    .bind(owner_id)
    .bind(geometry_to_json(new_geometry)?)
    .bind(area)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    Ok(area)
}

/// Upsert the initial base territory for an owner.
pub async fn upsert_initial(
    tx: &mut PgTransaction,
    owner_id: &str,
    display_name: &str,
    new_geometry: &MultiPolygon<f64>,
    base: Option<LatLng>,
) -> Result<f64, StoreError> {
    let area = geometry::area_m2(new_geometry);
    sqlx::query(
        "INSERT INTO territories (owner_id, display_name, geometry, area_m2, base_lng, base_lat) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (owner_id) DO UPDATE SET \
           geometry = EXCLUDED.geometry, area_m2 = EXCLUDED.area_m2, \
           base_lng = COALESCE(EXCLUDED.base_lng, territories.base_lng), \
           base_lat = COALESCE(EXCLUDED.base_lat, territories.base_lat), \
           updated_at = NOW()",
    )
    .bind(owner_id)
    .bind(display_name)
    .bind(geometry_to_json(new_geometry)?)
    .bind(area)
    .bind(base.map(|b| b.lng))
    .bind(base.map(|b| b.lat))
    .execute(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    Ok(area)
}

/// `geometry <- union(current, addendum)`. Returns the new geometry and
/// area. A missing or empty row contributes nothing to the union.
pub async fn union_into(
    tx: &mut PgTransaction,
    owner_id: &str,
    addendum: &MultiPolygon<f64>,
) -> Result<(MultiPolygon<f64>, f64), StoreError> {
    let current = load_for_update(tx, owner_id)
        .await?
        .map(|row| row.geometry)
        .unwrap_or_else(geometry::empty);
    let merged = geometry::union(&current, addendum);
    let area = replace_territory(tx, owner_id, &merged).await?;
    Ok((merged, area))
}

/// `geometry <- extract_polygonal(difference(current, subtrahend))`.
/// Returns the new geometry and area; empty results are stored as the
/// canonical empty geometry with area 0.
pub async fn difference_out(
    tx: &mut PgTransaction,
    owner_id: &str,
    subtrahend: &MultiPolygon<f64>,
) -> Result<(MultiPolygon<f64>, f64), StoreError> {
    let current = load_for_update(tx, owner_id)
        .await?
        .map(|row| row.geometry)
        .unwrap_or_else(geometry::empty);
    let remaining = geometry::difference(&current, subtrahend);
    let area = replace_territory(tx, owner_id, &remaining).await?;
    Ok((remaining, area))
}

pub async fn set_carve_mode(
    tx: &mut PgTransaction,
    owner_id: &str,
    carve_mode: bool,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE territories SET carve_mode = $2 WHERE owner_id = $1")
        .bind(owner_id)
        .bind(carve_mode)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::Db)?;
    Ok(())
}

pub async fn set_laps_required(
    tx: &mut PgTransaction,
    owner_id: &str,
    laps_required: i32,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE territories SET laps_required = $2 WHERE owner_id = $1")
        .bind(owner_id)
        .bind(laps_required)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::Db)?;
    Ok(())
}

pub async fn arm_shield(
    tx: &mut PgTransaction,
    owner_id: &str,
    activated_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE territories SET shield_owned = TRUE, shield_active = TRUE, \
         shield_activated_at = $2 WHERE owner_id = $1",
    )
    .bind(owner_id)
    .bind(activated_at)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    Ok(())
}

pub async fn snapshot_territories(pool: &PgPool) -> Result<Vec<TerritorySummary>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {TERRITORY_COLUMNS} FROM territories WHERE area_m2 > 0 ORDER BY owner_id"
    ))
    .fetch_all(pool)
    .await
    .map_err(StoreError::Db)?;
    rows.iter()
        .map(|row| territory_from_row(row).map(|t| t.summary()))
        .collect()
}

pub async fn load_banned_until(
    pool: &PgPool,
    owner_id: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let value: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT banned_until FROM territories WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::Db)?;
    Ok(value.flatten())
}

pub async fn set_ban(
    pool: &PgPool,
    owner_id: &str,
    until: Option<DateTime<Utc>>,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE territories SET banned_until = $2 WHERE owner_id = $1")
        .bind(owner_id)
        .bind(until)
        .execute(pool)
        .await
        .map_err(StoreError::Db)?;
    Ok(result.rows_affected() > 0)
}

/// Expire shields activated before `cutoff`; the spent last stand leaves the
/// owned set with the flags. Returns affected owner ids.
pub async fn expire_shields(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query(
        "UPDATE territories SET shield_owned = FALSE, shield_active = FALSE, \
           superpowers = jsonb_set(superpowers, '{owned}', \
             COALESCE(superpowers->'owned', '[]'::jsonb) - 'lastStand') \
         WHERE shield_active AND shield_activated_at < $1 \
         RETURNING owner_id",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .map_err(StoreError::Db)?;
    rows.iter()
        .map(|row| row.try_get("owner_id").map_err(StoreError::Db))
        .collect()
}

// ==================== Clans ====================

fn clan_from_row(row: &PgRow) -> Result<ClanRow, StoreError> {
    let base_lng: Option<f64> = row.try_get("base_lng").map_err(StoreError::Db)?;
    let base_lat: Option<f64> = row.try_get("base_lat").map_err(StoreError::Db)?;
    Ok(ClanRow {
        id: row.try_get("id").map_err(StoreError::Db)?,
        name: row.try_get("name").map_err(StoreError::Db)?,
        tag: row.try_get("tag").map_err(StoreError::Db)?,
        leader_id: row.try_get("leader_id").map_err(StoreError::Db)?,
        base: match (base_lat, base_lng) {
            (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
            _ => None,
        },
        shield: row.try_get("shield").map_err(StoreError::Db)?,
    })
}

pub async fn create_clan(
    pool: &PgPool,
    name: &str,
    tag: &str,
    leader_id: &str,
) -> Result<ClanRow, StoreError> {
    let mut tx = pool.begin().await.map_err(StoreError::Db)?;
    let id = Uuid::new_v4();
    let row = sqlx::query(
        "INSERT INTO clans (id, name, tag, leader_id) VALUES ($1, $2, $3, $4) \
         RETURNING id, name, tag, leader_id, base_lng, base_lat, shield",
    )
    .bind(id)
    .bind(name)
    .bind(tag)
    .bind(leader_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(StoreError::Db)?;
    let clan = clan_from_row(&row)?;
    sqlx::query("INSERT INTO clan_members (clan_id, player_id) VALUES ($1, $2)")
        .bind(id)
        .bind(leader_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Db)?;
    tx.commit().await.map_err(StoreError::Db)?;
    Ok(clan)
}

pub async fn add_clan_member(
    pool: &PgPool,
    clan_id: Uuid,
    player_id: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO clan_members (clan_id, player_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(clan_id)
    .bind(player_id)
    .execute(pool)
    .await
    .map_err(StoreError::Db)?;
    Ok(())
}

/// The claiming player's clan, locked for the duration of the transaction.
pub async fn clan_of_player_for_update(
    tx: &mut PgTransaction,
    player_id: &str,
) -> Result<Option<ClanRow>, StoreError> {
    let row = sqlx::query(
        "SELECT c.id, c.name, c.tag, c.leader_id, c.base_lng, c.base_lat, c.shield \
         FROM clans c JOIN clan_members m ON m.clan_id = c.id \
         WHERE m.player_id = $1 FOR UPDATE OF c",
    )
    .bind(player_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    row.as_ref().map(clan_from_row).transpose()
}

/// Clan membership lookup without locking the clan row.
pub async fn clan_id_of_player(
    tx: &mut PgTransaction,
    player_id: &str,
) -> Result<Option<Uuid>, StoreError> {
    sqlx::query_scalar("SELECT clan_id FROM clan_members WHERE player_id = $1")
        .bind(player_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(StoreError::Db)
}

pub async fn clan_member_ids(
    tx: &mut PgTransaction,
    clan_id: Uuid,
) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query("SELECT player_id FROM clan_members WHERE clan_id = $1")
        .bind(clan_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(StoreError::Db)?;
    rows.iter()
        .map(|row| row.try_get("player_id").map_err(StoreError::Db))
        .collect()
}

pub async fn set_clan_base(
    tx: &mut PgTransaction,
    clan_id: Uuid,
    base: LatLng,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE clans SET base_lng = $2, base_lat = $3 WHERE id = $1")
        .bind(clan_id)
        .bind(base.lng)
        .bind(base.lat)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::Db)?;
    Ok(())
}

fn clan_territory_from_row(row: &PgRow) -> Result<ClanTerritoryRow, StoreError> {
    Ok(ClanTerritoryRow {
        clan_id: row.try_get("clan_id").map_err(StoreError::Db)?,
        name: row.try_get("name").map_err(StoreError::Db)?,
        tag: row.try_get("tag").map_err(StoreError::Db)?,
        geometry: geometry_from_json(row.try_get("geometry").map_err(StoreError::Db)?)?,
        area_m2: row.try_get("area_m2").map_err(StoreError::Db)?,
        shield: row.try_get("shield").map_err(StoreError::Db)?,
    })
}

const CLAN_TERRITORY_SELECT: &str =
    "SELECT t.clan_id, c.name, c.tag, t.geometry, t.area_m2, c.shield \
     FROM clan_territories t JOIN clans c ON c.id = t.clan_id";

pub async fn insert_clan_territory(
    tx: &mut PgTransaction,
    clan_id: Uuid,
    new_geometry: &MultiPolygon<f64>,
) -> Result<f64, StoreError> {
    let area = geometry::area_m2(new_geometry);
    sqlx::query(
        "INSERT INTO clan_territories (clan_id, geometry, area_m2) VALUES ($1, $2, $3) \
         ON CONFLICT (clan_id) DO UPDATE SET \
           geometry = EXCLUDED.geometry, area_m2 = EXCLUDED.area_m2, updated_at = NOW()",
    )
    .bind(clan_id)
    .bind(geometry_to_json(new_geometry)?)
    .bind(area)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    Ok(area)
}

pub async fn load_clan_territory_for_update(
    tx: &mut PgTransaction,
    clan_id: Uuid,
) -> Result<Option<ClanTerritoryRow>, StoreError> {
    let row = sqlx::query(&format!(
        "{CLAN_TERRITORY_SELECT} WHERE t.clan_id = $1 FOR UPDATE OF t"
    ))
    .bind(clan_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    row.as_ref().map(clan_territory_from_row).transpose()
}

pub async fn replace_clan_territory(
    tx: &mut PgTransaction,
    clan_id: Uuid,
    new_geometry: &MultiPolygon<f64>,
) -> Result<f64, StoreError> {
    let area = geometry::area_m2(new_geometry);
    sqlx::query(
        "UPDATE clan_territories SET geometry = $2, area_m2 = $3, updated_at = NOW() \
         WHERE clan_id = $1",
    )
    .bind(clan_id)
    .bind(geometry_to_json(new_geometry)?)
    .bind(area)
    .execute(&mut **tx)
    .await
    .map_err(StoreError::Db)?;
    Ok(area)
}

/// Clan territories intersecting `region`, ascending by clan id, locked.
pub async fn find_intersecting_clans(
    tx: &mut PgTransaction,
    region: &MultiPolygon<f64>,
    exclude_clan: Option<Uuid>,
) -> Result<Vec<ClanTerritoryRow>, StoreError> {
    let candidates = sqlx::query(
        "SELECT clan_id, geometry FROM clan_territories \
         WHERE area_m2 > 0 AND ($1::uuid IS NULL OR clan_id <> $1)",
    )
    .bind(exclude_clan)
    .fetch_all(&mut **tx)
    .await
    .map_err(StoreError::Db)?;

    let mut ids: Vec<Uuid> = Vec::new();
    for row in &candidates {
        let geometry = geometry_from_json(row.try_get("geometry").map_err(StoreError::Db)?)?;
        if geometry::intersects(&geometry, region) {
            ids.push(row.try_get("clan_id").map_err(StoreError::Db)?);
        }
    }
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let locked = sqlx::query(&format!(
        "{CLAN_TERRITORY_SELECT} WHERE t.clan_id = ANY($1) ORDER BY t.clan_id FOR UPDATE OF t"
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(StoreError::Db)?;

    let mut rows = Vec::with_capacity(locked.len());
    for row in &locked {
        let territory = clan_territory_from_row(row)?;
        if geometry::intersects(&territory.geometry, region) {
            rows.push(territory);
        }
    }
    Ok(rows)
}

pub async fn snapshot_clan_territories(
    pool: &PgPool,
) -> Result<Vec<ClanTerritorySummary>, StoreError> {
    let rows = sqlx::query(&format!(
        "{CLAN_TERRITORY_SELECT} WHERE t.area_m2 > 0 ORDER BY t.clan_id"
    ))
    .fetch_all(pool)
    .await
    .map_err(StoreError::Db)?;
    rows.iter()
        .map(|row| clan_territory_from_row(row).map(|t| t.summary()))
        .collect()
}

// ==================== Chests ====================

pub async fn load_chests(pool: &PgPool) -> Result<Vec<Chest>, StoreError> {
    let rows = sqlx::query("SELECT id, lng, lat, active FROM superpower_chests WHERE active")
        .fetch_all(pool)
        .await
        .map_err(StoreError::Db)?;
    rows.iter()
        .map(|row| {
            Ok(Chest {
                id: row.try_get("id").map_err(StoreError::Db)?,
                location: LatLng::new(
                    row.try_get("lat").map_err(StoreError::Db)?,
                    row.try_get("lng").map_err(StoreError::Db)?,
                ),
                active: row.try_get("active").map_err(StoreError::Db)?,
            })
        })
        .collect()
}

pub async fn insert_chest(pool: &PgPool, location: LatLng) -> Result<Chest, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO superpower_chests (id, lng, lat, active) VALUES ($1, $2, $3, TRUE)")
        .bind(id)
        .bind(location.lng)
        .bind(location.lat)
        .execute(pool)
        .await
        .map_err(StoreError::Db)?;
    Ok(Chest {
        id,
        location,
        active: true,
    })
}

/// First claimer wins: flips the chest inactive iff it still is active.
pub async fn try_claim_chest(tx: &mut PgTransaction, chest_id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE superpower_chests SET active = FALSE WHERE id = $1 AND active")
        .bind(chest_id)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::Db)?;
    Ok(result.rows_affected() > 0)
}

// ==================== Quests ====================

pub async fn create_quest(
    pool: &PgPool,
    kind: &str,
    target: f64,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO quests (id, kind, target, active, expires_at) VALUES ($1, $2, $3, TRUE, $4)",
    )
    .bind(id)
    .bind(kind)
    .bind(target)
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(StoreError::Db)?;
    Ok(id)
}

pub async fn deactivate_expired_quests(pool: &PgPool) -> Result<u64, StoreError> {
    let result = sqlx::query("UPDATE quests SET active = FALSE WHERE active AND expires_at < NOW()")
        .execute(pool)
        .await
        .map_err(StoreError::Db)?;
    Ok(result.rows_affected())
}
