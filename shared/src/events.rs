use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::LatLng;
use crate::player::{PlayerMode, PlayerPosition, PowerKind};
use crate::territory::{ChestSummary, ClanTerritorySummary, TerritorySummary, ZoneSummary};

/// Circular initial claim around a single GPS point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseClaim {
    pub lng: f64,
    pub lat: f64,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

/// Events the server consumes over the persistent stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    PlayerJoined {
        player_id: String,
        display_name: String,
        mode: PlayerMode,
    },
    LocationUpdate {
        lat: f64,
        lng: f64,
    },
    StartDrawingTrail,
    StopDrawingTrail,
    ClaimTerritory {
        mode: PlayerMode,
        #[serde(default)]
        trail: Option<Vec<LatLng>>,
        #[serde(default)]
        base_claim: Option<BaseClaim>,
    },
    ActivateLastStand,
    ActivateGhostRunner,
    ActivateInfiltrator,
    ActivateTrailDefense,
    CreateArena {
        target_owner_id: String,
    },
    StartConquest,
    RecordLap {
        path: Vec<LatLng>,
    },
}

/// Events the server emits over the persistent stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ExistingTerritories {
        territories: Vec<TerritorySummary>,
        #[serde(default)]
        clans: Vec<ClanTerritorySummary>,
    },
    BatchTerritoryUpdate {
        updates: Vec<TerritorySummary>,
        #[serde(default)]
        clans: Vec<ClanTerritorySummary>,
    },
    ClaimSuccessful {
        new_total_area_m2: f64,
        area_claimed_m2: f64,
    },
    ClaimRejected {
        reason: String,
    },
    TrailStarted {
        player_id: String,
        #[serde(default)]
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<(u8, u8, u8)>,
    },
    TrailPointAdded {
        player_id: String,
        point: LatLng,
    },
    TrailCleared {
        player_id: String,
    },
    RunTerminated {
        reason: String,
    },
    ShieldBroken {
        attacker_name: String,
    },
    ShieldExpired,
    ArenaCreated {
        target_owner_id: String,
        center: LatLng,
        radius_m: f64,
        required_laps: i32,
    },
    ArenaEntered {
        target_owner_id: String,
    },
    ArenaTimeout {
        target_owner_id: String,
    },
    ConquestStarted {
        target_owner_id: String,
        laps_required: i32,
        expires_at: DateTime<Utc>,
    },
    ConquestProgress {
        laps_completed: i32,
        laps_required: i32,
        similarity: f64,
    },
    ConquerAttemptSuccessful {
        attacker_id: String,
        target_owner_id: String,
        area_m2: f64,
    },
    ConquestFailed {
        reason: String,
    },
    QuestProgressUpdate {
        quest_id: String,
        current: f64,
        target: f64,
    },
    QuestCompleted {
        quest_id: String,
        winner_id: String,
    },
    SuperpowersGranted {
        powers: Vec<PowerKind>,
    },
    SuperpowerAcknowledged {
        power: PowerKind,
    },
    GeofenceUpdate {
        zones: Vec<ZoneSummary>,
    },
    ChestSpawned {
        chest: ChestSummary,
    },
    ChestClaimed {
        chest_id: String,
        player_id: String,
    },
    AccountBanned {
        #[serde(default)]
        #[serde(skip_serializing_if = "Option::is_none")]
        until: Option<DateTime<Utc>>,
    },
    PlayerPositions {
        players: Vec<PlayerPosition>,
    },
}

#[cfg(test)]
mod tests {
    use super::{ClientEvent, ServerEvent};
    use crate::player::PlayerMode;

    #[test]
    fn client_events_use_camel_case_tags() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"playerJoined","playerId":"p1","displayName":"Ada","mode":"solo"}"#,
        )
        .expect("parse playerJoined");
        match event {
            ClientEvent::PlayerJoined {
                player_id,
                display_name,
                mode,
            } => {
                assert_eq!(player_id, "p1");
                assert_eq!(display_name, "Ada");
                assert_eq!(mode, PlayerMode::Solo);
            }
            other => panic!("expected playerJoined, got {other:?}"),
        }
    }

    #[test]
    fn claim_territory_accepts_missing_optional_fields() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"claimTerritory","mode":"solo"}"#)
                .expect("parse claimTerritory");
        match event {
            ClientEvent::ClaimTerritory { trail, base_claim, .. } => {
                assert!(trail.is_none());
                assert!(base_claim.is_none());
            }
            other => panic!("expected claimTerritory, got {other:?}"),
        }
    }

    #[test]
    fn server_events_serialize_with_camel_case_tags() {
        let json = serde_json::to_string(&ServerEvent::ClaimRejected {
            reason: "trail too short".to_string(),
        })
        .expect("serialize claimRejected");
        assert_eq!(json, r#"{"type":"claimRejected","reason":"trail too short"}"#);
    }

    #[test]
    fn run_terminated_reason_survives_round_trip() {
        let json = serde_json::to_string(&ServerEvent::RunTerminated {
            reason: "cut by Ada".to_string(),
        })
        .expect("serialize runTerminated");
        let back: ServerEvent = serde_json::from_str(&json).expect("deserialize runTerminated");
        match back {
            ServerEvent::RunTerminated { reason } => assert!(reason.contains("cut by")),
            other => panic!("expected runTerminated, got {other:?}"),
        }
    }
}
