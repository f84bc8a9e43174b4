use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::{LatLng, MultiPolygonRings};

/// Public view of one player's holdings, as broadcast to every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerritorySummary {
    pub owner_id: String,
    pub display_name: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<(u8, u8, u8)>,
    pub area_m2: f64,
    pub geometry: MultiPolygonRings,
    pub laps_required: i32,
    pub shield_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClanTerritorySummary {
    pub clan_id: String,
    pub name: String,
    pub tag: String,
    pub area_m2: f64,
    pub geometry: MultiPolygonRings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoneKind {
    Allowed,
    Blocked,
}

/// A geofence zone; the polygon is a single exterior ring of `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSummary {
    pub id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub polygon: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChestSummary {
    pub id: String,
    pub location: LatLng,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestKind {
    CoverArea,
    RunTrail,
    TrailCut,
    SponsorCheckin,
}

impl QuestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestKind::CoverArea => "cover_area",
            QuestKind::RunTrail => "run_trail",
            QuestKind::TrailCut => "trail_cut",
            QuestKind::SponsorCheckin => "sponsor_checkin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestSummary {
    pub id: String,
    pub kind: QuestKind,
    pub target: f64,
    pub expires_at: DateTime<Utc>,
}
