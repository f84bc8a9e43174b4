use std::sync::Arc;

use geo::Polygon;
use landrush_shared::{LatLng, ZoneKind, ZoneSummary};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{GeometryError, StoreError};
use crate::geometry;

#[derive(Debug, Clone)]
struct CachedZone {
    id: Uuid,
    name: String,
    kind: ZoneKind,
    polygon: Polygon<f64>,
    ring: Vec<[f64; 2]>,
}

impl CachedZone {
    fn summary(&self) -> ZoneSummary {
        ZoneSummary {
            id: self.id.to_string(),
            name: self.name.clone(),
            kind: self.kind,
            polygon: self.ring.clone(),
        }
    }
}

/// Authoritative allowed/blocked zone gate. Zones live in Postgres and are
/// cached in memory; every update re-reads the full list.
#[derive(Clone)]
pub struct GeofenceService {
    zones: Arc<RwLock<Vec<CachedZone>>>,
}

impl GeofenceService {
    pub fn new() -> Self {
        Self {
            zones: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Hydrate the cache from the database. Returns the zone count.
    pub async fn load(&self, pool: &PgPool) -> Result<usize, StoreError> {
        let rows = sqlx::query("SELECT id, name, kind, polygon FROM geofence_zones ORDER BY name")
            .fetch_all(pool)
            .await
            .map_err(StoreError::Db)?;
        let mut zones = Vec::with_capacity(rows.len());
        for row in &rows {
            let ring: Vec<[f64; 2]> =
                serde_json::from_value(row.try_get("polygon").map_err(StoreError::Db)?)
                    .map_err(StoreError::corrupt)?;
            let kind =
                parse_kind(row.try_get("kind").map_err(StoreError::Db)?)
                    .map_err(StoreError::corrupt)?;
            let polygon = ring_to_polygon(&ring).map_err(StoreError::corrupt)?;
            zones.push(CachedZone {
                id: row.try_get("id").map_err(StoreError::Db)?,
                name: row.try_get("name").map_err(StoreError::Db)?,
                kind,
                polygon,
                ring,
            });
        }
        let count = zones.len();
        *self.zones.write().await = zones;
        Ok(count)
    }

    /// A point is valid iff some allowed zone contains it and no blocked
    /// zone does. With no allowed zones configured, every point is invalid.
    pub async fn is_valid(&self, lat: f64, lng: f64) -> bool {
        let zones = self.zones.read().await;
        point_valid(&zones, lat, lng)
    }

    pub async fn summaries(&self) -> Vec<ZoneSummary> {
        self.zones.read().await.iter().map(CachedZone::summary).collect()
    }

    /// Persist a new zone and refresh the cache.
    pub async fn create_zone(
        &self,
        pool: &PgPool,
        name: &str,
        kind: ZoneKind,
        ring: Vec<[f64; 2]>,
    ) -> Result<ZoneSummary, ZoneError> {
        let polygon = ring_to_polygon(&ring)?;
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO geofence_zones (id, name, kind, polygon) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(name)
            .bind(kind_str(kind))
            .bind(serde_json::to_value(&ring).map_err(StoreError::corrupt)?)
            .execute(pool)
            .await?;
        let zone = CachedZone {
            id,
            name: name.to_string(),
            kind,
            polygon,
            ring,
        };
        let summary = zone.summary();
        self.zones.write().await.push(zone);
        Ok(summary)
    }

    /// Delete a zone and refresh the cache. Returns whether a row went away.
    pub async fn delete_zone(&self, pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM geofence_zones WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        self.zones.write().await.retain(|zone| zone.id != id);
        Ok(true)
    }
}

impl Default for GeofenceService {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

fn point_valid(zones: &[CachedZone], lat: f64, lng: f64) -> bool {
    use geo::Contains;
    let point = geo::Point::new(lng, lat);
    let mut inside_allowed = false;
    for zone in zones {
        match zone.kind {
            ZoneKind::Blocked => {
                if zone.polygon.contains(&point) {
                    return false;
                }
            }
            ZoneKind::Allowed => {
                if !inside_allowed && zone.polygon.contains(&point) {
                    inside_allowed = true;
                }
            }
        }
    }
    inside_allowed
}

fn ring_to_polygon(ring: &[[f64; 2]]) -> Result<Polygon<f64>, GeometryError> {
    let points: Vec<LatLng> = ring.iter().map(|[lng, lat]| LatLng::new(*lat, *lng)).collect();
    geometry::close_trail(&points)
}

fn kind_str(kind: ZoneKind) -> &'static str {
    match kind {
        ZoneKind::Allowed => "allowed",
        ZoneKind::Blocked => "blocked",
    }
}

fn parse_kind(value: &str) -> Result<ZoneKind, GeometryError> {
    match value {
        "allowed" => Ok(ZoneKind::Allowed),
        "blocked" => Ok(ZoneKind::Blocked),
        _ => Err(GeometryError::InvalidGeometry("unknown zone kind")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(kind: ZoneKind, ring: Vec<[f64; 2]>) -> CachedZone {
        let polygon = ring_to_polygon(&ring).expect("zone polygon");
        CachedZone {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            kind,
            polygon,
            ring,
        }
    }

    fn unit_square(origin_lng: f64, origin_lat: f64, side_deg: f64) -> Vec<[f64; 2]> {
        vec![
            [origin_lng, origin_lat],
            [origin_lng + side_deg, origin_lat],
            [origin_lng + side_deg, origin_lat + side_deg],
            [origin_lng, origin_lat + side_deg],
        ]
    }

    #[test]
    fn no_allowed_zones_means_everything_is_invalid() {
        assert!(!point_valid(&[], 0.0, 0.0));
        let blocked_only = [zone(ZoneKind::Blocked, unit_square(-1.0, -1.0, 2.0))];
        assert!(!point_valid(&blocked_only, 5.0, 5.0));
    }

    #[test]
    fn point_inside_allowed_zone_is_valid() {
        let zones = [zone(ZoneKind::Allowed, unit_square(0.0, 0.0, 1.0))];
        assert!(point_valid(&zones, 0.5, 0.5));
        assert!(!point_valid(&zones, 1.5, 1.5));
    }

    #[test]
    fn blocked_zone_overrides_allowed_zone() {
        let zones = [
            zone(ZoneKind::Allowed, unit_square(0.0, 0.0, 1.0)),
            zone(ZoneKind::Blocked, unit_square(0.4, 0.4, 0.2)),
        ];
        assert!(point_valid(&zones, 0.1, 0.1));
        assert!(!point_valid(&zones, 0.5, 0.5));
    }
}
