use serde::{Deserialize, Serialize};

/// WGS-84 geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One polygon ring as `[lng, lat]` pairs, first ring exterior, rest holes.
pub type PolygonRings = Vec<Vec<[f64; 2]>>;

/// Wire/storage form of a (possibly empty) multi-polygon.
pub type MultiPolygonRings = Vec<PolygonRings>;
