use geo::{
    BooleanOps, Centroid, Contains, CoordsIter, Destination, Distance, Geodesic, GeodesicArea,
    Intersects, Line, LineString, MultiPolygon, Point, Polygon, coord,
};
use landrush_shared::{LatLng, MultiPolygonRings};

use crate::error::GeometryError;

/// Vertex count used when rasterizing a geodesic circle into a ring.
pub const CIRCLE_SEGMENTS: usize = 64;

/// Boolean-op residue below this geodesic area is dropped as a sliver.
const SLIVER_AREA_M2: f64 = 1e-4;

pub fn to_point(p: LatLng) -> Point<f64> {
    Point::new(p.lng, p.lat)
}

pub fn to_latlng(p: Point<f64>) -> LatLng {
    LatLng::new(p.y(), p.x())
}

/// Canonical empty geometry. Stored and broadcast as-is, never as null.
pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

pub fn is_empty(geometry: &MultiPolygon<f64>) -> bool {
    geometry.0.is_empty()
}

/// Geodesic area of a multi-polygon in square meters.
pub fn area_m2(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.geodesic_area_unsigned()
}

/// Geodesic distance between two coordinates in meters.
pub fn distance_m(a: LatLng, b: LatLng) -> f64 {
    Geodesic.distance(to_point(a), to_point(b))
}

/// Total geodesic length of an ordered point list in meters.
pub fn trail_length_m(points: &[LatLng]) -> f64 {
    points
        .windows(2)
        .map(|pair| distance_m(pair[0], pair[1]))
        .sum()
}

/// Geodesic circle polygon around `center`.
pub fn circle_polygon(center: LatLng, radius_m: f64) -> Result<Polygon<f64>, GeometryError> {
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(GeometryError::InvalidGeometry("circle radius must be positive"));
    }
    if !center.lat.is_finite() || !center.lng.is_finite() {
        return Err(GeometryError::InvalidGeometry("circle center is not finite"));
    }
    let origin = to_point(center);
    let ring: Vec<_> = (0..CIRCLE_SEGMENTS)
        .map(|i| {
            let bearing = 360.0 * i as f64 / CIRCLE_SEGMENTS as f64;
            let p = Geodesic.destination(origin, bearing, radius_m);
            coord! { x: p.x(), y: p.y() }
        })
        .collect();
    Ok(Polygon::new(LineString::from(ring), Vec::new()))
}

/// Close a running trail into the expansion polygon it encloses.
pub fn close_trail(points: &[LatLng]) -> Result<Polygon<f64>, GeometryError> {
    if points.len() < 3 {
        return Err(GeometryError::InvalidGeometry("trail needs at least 3 points"));
    }
    if points
        .iter()
        .any(|p| !p.lat.is_finite() || !p.lng.is_finite())
    {
        return Err(GeometryError::InvalidGeometry("trail point is not finite"));
    }
    let ring: Vec<_> = points
        .iter()
        .map(|p| coord! { x: p.lng, y: p.lat })
        .collect();
    // Polygon::new closes the ring when the first point is not repeated.
    let polygon = Polygon::new(LineString::from(ring), Vec::new());
    if polygon.geodesic_area_unsigned() <= SLIVER_AREA_M2 {
        return Err(GeometryError::InvalidGeometry("trail loop encloses no area"));
    }
    Ok(polygon)
}

/// Validity repair: keep only polygonal components with real area, dropping
/// stray lines, points and slivers left behind by boolean ops.
pub fn extract_polygonal(geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geometry
            .0
            .into_iter()
            .filter(|polygon| polygon.exterior().coords_count() >= 4)
            .filter(|polygon| polygon.geodesic_area_unsigned() > SLIVER_AREA_M2)
            .collect(),
    )
}

pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    extract_polygonal(a.union(b))
}

pub fn difference(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    extract_polygonal(a.difference(b))
}

pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    extract_polygonal(a.intersection(b))
}

pub fn intersects(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    a.intersects(b)
}

pub fn contains_point(geometry: &MultiPolygon<f64>, p: LatLng) -> bool {
    geometry.contains(&to_point(p))
}

/// True when `inner` lies fully inside `outer`.
pub fn contains_polygon(outer: &MultiPolygon<f64>, inner: &MultiPolygon<f64>) -> bool {
    outer.contains(inner)
}

pub fn to_multi(polygon: Polygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon])
}

/// Does the segment `(a, b)` cross any part of `polyline`?
/// A degenerate segment (repeated GPS fix) still participates.
pub fn segment_crosses_polyline(a: LatLng, b: LatLng, polyline: &[LatLng]) -> bool {
    if polyline.len() < 2 {
        return false;
    }
    let segment = Line::new(
        coord! { x: a.lng, y: a.lat },
        coord! { x: b.lng, y: b.lat },
    );
    let line: LineString<f64> = polyline
        .iter()
        .map(|p| coord! { x: p.lng, y: p.lat })
        .collect();
    segment.intersects(&line)
}

/// Symmetric average-minimum-distance between two point paths in meters.
/// Mean of both directions, geodesic distance per point pair.
pub fn avg_min_distance_m(a: &[LatLng], b: &[LatLng]) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let forward = directed_avg_min(a, b);
    let backward = directed_avg_min(b, a);
    Some((forward + backward) / 2.0)
}

fn directed_avg_min(from: &[LatLng], to: &[LatLng]) -> f64 {
    let total: f64 = from
        .iter()
        .map(|p| {
            to.iter()
                .map(|q| distance_m(*p, *q))
                .fold(f64::INFINITY, f64::min)
        })
        .sum();
    total / from.len() as f64
}

/// Path similarity on the linear kernel: 1 at identical paths, 0 at or
/// beyond `kernel_m` average error, clamped.
pub fn path_similarity(reference: &[LatLng], lap: &[LatLng], kernel_m: f64) -> f64 {
    match avg_min_distance_m(reference, lap) {
        Some(avg_error) => (1.0 - avg_error / kernel_m).clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// Centroid plus the largest geodesic distance from it to any boundary
/// vertex. None for empty geometry.
pub fn enclosing_circle(geometry: &MultiPolygon<f64>) -> Option<(LatLng, f64)> {
    let center = geometry.centroid()?;
    let center_ll = to_latlng(center);
    let max_distance = geometry
        .coords_iter()
        .map(|c| distance_m(center_ll, LatLng::new(c.y, c.x)))
        .fold(0.0_f64, f64::max);
    if max_distance <= 0.0 {
        return None;
    }
    Some((center_ll, max_distance))
}

/// Encode to the wire/storage ring format: `[polygon][ring][[lng, lat]]`.
pub fn encode_rings(geometry: &MultiPolygon<f64>) -> MultiPolygonRings {
    geometry
        .0
        .iter()
        .map(|polygon| {
            let mut rings = Vec::with_capacity(1 + polygon.interiors().len());
            rings.push(encode_ring(polygon.exterior()));
            rings.extend(polygon.interiors().iter().map(encode_ring));
            rings
        })
        .collect()
}

fn encode_ring(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

/// Decode the wire/storage ring format back into a multi-polygon.
pub fn decode_rings(rings: &MultiPolygonRings) -> Result<MultiPolygon<f64>, GeometryError> {
    let mut polygons = Vec::with_capacity(rings.len());
    for polygon_rings in rings {
        let Some((exterior, interiors)) = polygon_rings.split_first() else {
            return Err(GeometryError::InvalidGeometry("polygon without rings"));
        };
        let exterior = decode_ring(exterior)?;
        let interiors = interiors
            .iter()
            .map(|ring| decode_ring(ring))
            .collect::<Result<Vec<_>, _>>()?;
        polygons.push(Polygon::new(exterior, interiors));
    }
    Ok(MultiPolygon::new(polygons))
}

fn decode_ring(ring: &[[f64; 2]]) -> Result<LineString<f64>, GeometryError> {
    if ring.len() < 3 {
        return Err(GeometryError::InvalidGeometry("ring needs at least 3 points"));
    }
    if ring.iter().any(|[x, y]| !x.is_finite() || !y.is_finite()) {
        return Err(GeometryError::InvalidGeometry("ring coordinate is not finite"));
    }
    Ok(ring.iter().map(|[x, y]| coord! { x: *x, y: *y }).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Roughly one meter in degrees of latitude.
    const DEG_PER_M: f64 = 1.0 / 111_320.0;

    fn square(origin: LatLng, side_m: f64) -> Vec<LatLng> {
        let d = side_m * DEG_PER_M;
        vec![
            origin,
            LatLng::new(origin.lat, origin.lng + d),
            LatLng::new(origin.lat + d, origin.lng + d),
            LatLng::new(origin.lat + d, origin.lng),
        ]
    }

    #[test]
    fn circle_area_approximates_pi_r_squared() {
        let circle = circle_polygon(LatLng::new(0.0, 0.0), 30.0).expect("circle");
        let area = to_multi(circle).geodesic_area_unsigned();
        let expected = std::f64::consts::PI * 30.0 * 30.0;
        // 64-gon inscribed in the circle loses a fraction of a percent.
        assert!((area - expected).abs() < expected * 0.01, "area {area}");
    }

    #[test]
    fn circle_rejects_zero_radius() {
        assert!(circle_polygon(LatLng::new(0.0, 0.0), 0.0).is_err());
    }

    #[test]
    fn close_trail_of_two_points_is_rejected() {
        let points = vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, 0.001)];
        assert!(close_trail(&points).is_err());
    }

    #[test]
    fn closed_square_has_expected_area() {
        let polygon = close_trail(&square(LatLng::new(0.0, 0.0), 20.0)).expect("close square");
        let area = to_multi(polygon).geodesic_area_unsigned();
        assert!((area - 400.0).abs() < 2.0, "area {area}");
    }

    #[test]
    fn difference_of_disjoint_regions_is_identity() {
        let a = to_multi(close_trail(&square(LatLng::new(0.0, 0.0), 20.0)).expect("a"));
        let b = to_multi(close_trail(&square(LatLng::new(0.01, 0.01), 20.0)).expect("b"));
        let result = difference(&a, &b);
        assert!((area_m2(&result) - area_m2(&a)).abs() < 1.0);
    }

    #[test]
    fn union_and_difference_conserve_area() {
        // Two 20 m squares overlapping by a 10 m strip.
        let a = to_multi(close_trail(&square(LatLng::new(0.0, 0.0), 20.0)).expect("a"));
        let b = to_multi(
            close_trail(&square(LatLng::new(0.0, 10.0 * DEG_PER_M), 20.0)).expect("b"),
        );
        let merged = union(&a, &b);
        let overlap = area_m2(&a) + area_m2(&b) - area_m2(&merged);
        assert!((overlap - 200.0).abs() < 2.0, "overlap {overlap}");

        let remaining = difference(&a, &b);
        assert!((area_m2(&remaining) - 200.0).abs() < 2.0);
    }

    #[test]
    fn difference_covering_everything_is_canonical_empty() {
        let a = to_multi(close_trail(&square(LatLng::new(0.0, 0.0), 20.0)).expect("a"));
        let b = to_multi(close_trail(&square(LatLng::new(-10.0 * DEG_PER_M, -10.0 * DEG_PER_M), 60.0)).expect("b"));
        let result = difference(&a, &b);
        assert!(is_empty(&result));
        assert_eq!(area_m2(&result), 0.0);
    }

    #[test]
    fn segment_crossing_a_polyline_is_detected() {
        let polyline = vec![
            LatLng::new(0.0, -0.001),
            LatLng::new(0.0, 0.001),
        ];
        assert!(segment_crosses_polyline(
            LatLng::new(-0.001, 0.0),
            LatLng::new(0.001, 0.0),
            &polyline
        ));
        assert!(!segment_crosses_polyline(
            LatLng::new(0.0005, 0.0),
            LatLng::new(0.001, 0.0),
            &polyline
        ));
    }

    #[test]
    fn degenerate_segment_on_the_line_still_intersects() {
        let polyline = vec![LatLng::new(0.0, -0.001), LatLng::new(0.0, 0.001)];
        let p = LatLng::new(0.0, 0.0);
        assert!(segment_crosses_polyline(p, p, &polyline));
    }

    #[test]
    fn similarity_at_fifteen_meter_offset_hits_the_threshold() {
        // Two parallel 10-point paths offset 15 m in latitude: avg error 15 m,
        // similarity 1 - 15/50 = 0.7.
        let reference: Vec<LatLng> = (0..10)
            .map(|i| LatLng::new(0.0, i as f64 * 10.0 * DEG_PER_M))
            .collect();
        let lap: Vec<LatLng> = (0..10)
            .map(|i| LatLng::new(15.0 * DEG_PER_M, i as f64 * 10.0 * DEG_PER_M))
            .collect();
        let similarity = path_similarity(&reference, &lap, 50.0);
        assert!((similarity - 0.7).abs() < 0.005, "similarity {similarity}");
    }

    #[test]
    fn identical_paths_have_similarity_one() {
        let path: Vec<LatLng> = (0..5)
            .map(|i| LatLng::new(0.0, i as f64 * 10.0 * DEG_PER_M))
            .collect();
        assert_eq!(path_similarity(&path, &path, 50.0), 1.0);
    }

    #[test]
    fn rings_round_trip_through_encode_decode() {
        let original = to_multi(close_trail(&square(LatLng::new(0.0, 0.0), 20.0)).expect("square"));
        let rings = encode_rings(&original);
        let decoded = decode_rings(&rings).expect("decode");
        assert!((area_m2(&decoded) - area_m2(&original)).abs() < 1e-6);
    }

    #[test]
    fn decode_rejects_degenerate_rings() {
        let rings = vec![vec![vec![[0.0, 0.0], [0.001, 0.0]]]];
        assert!(decode_rings(&rings).is_err());
    }

    #[test]
    fn enclosing_circle_covers_all_vertices() {
        let geometry = to_multi(close_trail(&square(LatLng::new(0.0, 0.0), 100.0)).expect("square"));
        let (center, radius) = enclosing_circle(&geometry).expect("circle");
        // Center of a 100 m square to a corner is ~70.7 m.
        assert!((radius - 70.7).abs() < 1.0, "radius {radius}");
        assert!(contains_point(&geometry, center));
    }

    #[test]
    fn empty_geometry_has_no_enclosing_circle() {
        assert!(enclosing_circle(&empty()).is_none());
    }
}
