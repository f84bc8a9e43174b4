use serde::{Deserialize, Serialize};

use crate::geo::LatLng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerMode {
    Solo,
    Clan,
    Spectator,
}

impl PlayerMode {
    pub fn can_draw(self) -> bool {
        matches!(self, PlayerMode::Solo | PlayerMode::Clan)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerKind {
    LastStand,
    Infiltrator,
    GhostRunner,
    TrailDefense,
}

impl PowerKind {
    pub const ALL: [PowerKind; 4] = [
        PowerKind::LastStand,
        PowerKind::Infiltrator,
        PowerKind::GhostRunner,
        PowerKind::TrailDefense,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PowerKind::LastStand => "lastStand",
            PowerKind::Infiltrator => "infiltrator",
            PowerKind::GhostRunner => "ghostRunner",
            PowerKind::TrailDefense => "trailDefense",
        }
    }
}

/// Lightweight position sample broadcast by the ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPosition {
    pub player_id: String,
    pub location: LatLng,
    pub mode: PlayerMode,
}

#[cfg(test)]
mod tests {
    use super::{PlayerMode, PowerKind};

    #[test]
    fn spectators_cannot_draw() {
        assert!(PlayerMode::Solo.can_draw());
        assert!(PlayerMode::Clan.can_draw());
        assert!(!PlayerMode::Spectator.can_draw());
    }

    #[test]
    fn power_kind_round_trips_through_serde() {
        for power in PowerKind::ALL {
            let json = serde_json::to_string(&power).expect("serialize power kind");
            assert_eq!(json.trim_matches('"'), power.as_str());
            let back: PowerKind = serde_json::from_str(&json).expect("deserialize power kind");
            assert_eq!(back, power);
        }
    }
}
