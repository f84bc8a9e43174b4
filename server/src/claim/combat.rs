use geo::MultiPolygon;

use crate::config::WIPEOUT_THRESHOLD_M2;
use crate::geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VictimKind {
    Solo,
    Clan,
}

/// A victim territory as read FOR UPDATE at combat entry. The shield flag
/// is observed exactly once, here.
#[derive(Debug, Clone)]
pub struct VictimState {
    pub key: String,
    pub kind: VictimKind,
    pub display_name: String,
    pub geometry: MultiPolygon<f64>,
    pub shield_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimImpact {
    /// Shield consumed; the victim survives as an island hole in the
    /// attacker's land.
    ShieldBroken,
    /// Remaining area fell under the wipeout threshold.
    Wiped,
    /// Partial hit; geometry is the surviving remainder.
    Partial,
}

#[derive(Debug, Clone)]
pub struct VictimUpdate {
    pub key: String,
    pub kind: VictimKind,
    pub display_name: String,
    pub geometry: MultiPolygon<f64>,
    pub impact: VictimImpact,
}

/// Which geometry unshielded victims lose land against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfluenceRule {
    /// Victim remainder is computed against the attacker's pre-existing
    /// land unioned with the new polygon.
    TotalInfluence,
    /// Carve-mode expansions subtract only the new polygon.
    NewPolygonOnly,
}

#[derive(Debug, Clone)]
pub struct CombatOutcome {
    pub attacker_final: MultiPolygon<f64>,
    pub victims: Vec<VictimUpdate>,
}

/// Every shielded victim subtracted the attacker's land away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatNullified;

/// Resolve a claim against every intersecting victim. Victims are processed
/// in a deterministic order (solo before clan, ascending key) so the
/// island-vs-wipeout interleaving is reproducible.
pub fn resolve_combat(
    attacker_existing: &MultiPolygon<f64>,
    new_polygon: &MultiPolygon<f64>,
    mut victims: Vec<VictimState>,
    rule: InfluenceRule,
) -> Result<CombatOutcome, CombatNullified> {
    victims.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));

    let total_influence = geometry::union(attacker_existing, new_polygon);
    let mut attacker_final = total_influence.clone();
    let mut updates = Vec::with_capacity(victims.len());

    for victim in victims {
        if victim.shield_active {
            attacker_final = geometry::difference(&attacker_final, &victim.geometry);
            updates.push(VictimUpdate {
                key: victim.key,
                kind: victim.kind,
                display_name: victim.display_name,
                geometry: victim.geometry,
                impact: VictimImpact::ShieldBroken,
            });
            continue;
        }

        let basis = match rule {
            InfluenceRule::TotalInfluence => &total_influence,
            InfluenceRule::NewPolygonOnly => new_polygon,
        };
        let remaining = geometry::difference(&victim.geometry, basis);
        let (new_geometry, impact) = if geometry::area_m2(&remaining) < WIPEOUT_THRESHOLD_M2 {
            (geometry::empty(), VictimImpact::Wiped)
        } else {
            (remaining, VictimImpact::Partial)
        };
        updates.push(VictimUpdate {
            key: victim.key,
            kind: victim.kind,
            display_name: victim.display_name,
            geometry: new_geometry,
            impact,
        });
    }

    if geometry::area_m2(&attacker_final) < WIPEOUT_THRESHOLD_M2 {
        return Err(CombatNullified);
    }

    Ok(CombatOutcome {
        attacker_final,
        victims: updates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{area_m2, close_trail, empty, to_multi};
    use landrush_shared::LatLng;

    const DEG_PER_M: f64 = 1.0 / 111_320.0;

    fn square(origin_lat_m: f64, origin_lng_m: f64, side_m: f64) -> MultiPolygon<f64> {
        let lat = origin_lat_m * DEG_PER_M;
        let lng = origin_lng_m * DEG_PER_M;
        let d = side_m * DEG_PER_M;
        to_multi(
            close_trail(&[
                LatLng::new(lat, lng),
                LatLng::new(lat, lng + d),
                LatLng::new(lat + d, lng + d),
                LatLng::new(lat + d, lng),
            ])
            .expect("square"),
        )
    }

    fn victim(key: &str, geometry: MultiPolygon<f64>, shield_active: bool) -> VictimState {
        VictimState {
            key: key.to_string(),
            kind: VictimKind::Solo,
            display_name: key.to_string(),
            geometry,
            shield_active,
        }
    }

    #[test]
    fn partial_hit_transfers_the_overlap() {
        // Victim: 100 m square (~10 000 m²). Attacker expansion overlaps a
        // 50 m strip of it (~5 000 m²).
        let victim_geometry = square(0.0, 100.0, 100.0);
        let expansion = square(0.0, 50.0, 100.0);
        let before_victim = area_m2(&victim_geometry);

        let outcome = resolve_combat(
            &empty(),
            &expansion,
            vec![victim("bob", victim_geometry, false)],
            InfluenceRule::TotalInfluence,
        )
        .expect("combat resolves");

        assert_eq!(outcome.victims.len(), 1);
        assert_eq!(outcome.victims[0].impact, VictimImpact::Partial);
        let after_victim = area_m2(&outcome.victims[0].geometry);
        assert!((before_victim - after_victim - 5_000.0).abs() < 10.0);
        assert!((area_m2(&outcome.attacker_final) - 10_000.0).abs() < 10.0);
    }

    #[test]
    fn shielded_victim_becomes_an_island_hole() {
        let victim_geometry = square(0.0, 100.0, 100.0);
        let expansion = square(0.0, 50.0, 100.0);
        let victim_before = area_m2(&victim_geometry);

        let outcome = resolve_combat(
            &empty(),
            &expansion,
            vec![victim("bob", victim_geometry.clone(), true)],
            InfluenceRule::TotalInfluence,
        )
        .expect("combat resolves");

        let update = &outcome.victims[0];
        assert_eq!(update.impact, VictimImpact::ShieldBroken);
        assert!((area_m2(&update.geometry) - victim_before).abs() < 1.0);
        // Attacker keeps only the half outside the shielded victim.
        assert!((area_m2(&outcome.attacker_final) - 5_000.0).abs() < 10.0);
    }

    #[test]
    fn shielded_hit_conserves_total_area() {
        let attacker_existing = square(0.0, -150.0, 100.0);
        let victim_geometry = square(0.0, 50.0, 100.0);
        let expansion = square(0.0, -20.0, 100.0);
        let before_total =
            area_m2(&attacker_existing) + area_m2(&victim_geometry);
        let gain_outside = area_m2(&geometry::difference(
            &geometry::union(&attacker_existing, &expansion),
            &geometry::union(&attacker_existing, &victim_geometry),
        ));

        let outcome = resolve_combat(
            &attacker_existing,
            &expansion,
            vec![victim("bob", victim_geometry.clone(), true)],
            InfluenceRule::TotalInfluence,
        )
        .expect("combat resolves");

        let after_total =
            area_m2(&outcome.attacker_final) + area_m2(&outcome.victims[0].geometry);
        assert!((after_total - before_total - gain_outside).abs() < 10.0);
    }

    #[test]
    fn tiny_remainder_wipes_the_victim() {
        let victim_geometry = square(0.0, 0.0, 50.0);
        let expansion = square(-10.0, -10.0, 80.0);

        let outcome = resolve_combat(
            &empty(),
            &expansion,
            vec![victim("bob", victim_geometry, false)],
            InfluenceRule::TotalInfluence,
        )
        .expect("combat resolves");

        assert_eq!(outcome.victims[0].impact, VictimImpact::Wiped);
        assert!(geometry::is_empty(&outcome.victims[0].geometry));
        assert_eq!(area_m2(&outcome.victims[0].geometry), 0.0);
    }

    #[test]
    fn claim_fully_inside_shielded_victim_is_nullified() {
        let victim_geometry = square(-100.0, -100.0, 300.0);
        let expansion = square(0.0, 0.0, 50.0);

        let result = resolve_combat(
            &empty(),
            &expansion,
            vec![victim("bob", victim_geometry, true)],
            InfluenceRule::TotalInfluence,
        );
        assert!(matches!(result, Err(CombatNullified)));
    }

    #[test]
    fn victims_resolve_in_ascending_key_order() {
        let expansion = square(0.0, 0.0, 200.0);
        let outcome = resolve_combat(
            &empty(),
            &expansion,
            vec![
                victim("zed", square(0.0, 120.0, 50.0), false),
                victim("amy", square(0.0, 10.0, 50.0), false),
            ],
            InfluenceRule::TotalInfluence,
        )
        .expect("combat resolves");
        let keys: Vec<&str> = outcome.victims.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, ["amy", "zed"]);
    }

    #[test]
    fn total_influence_takes_more_than_the_new_polygon_alone() {
        // Attacker's pre-existing land already overlaps the victim; the new
        // polygon does not reach that part. Under total influence the old
        // overlap is still carved out of the victim.
        let attacker_existing = square(0.0, 60.0, 50.0);
        let victim_geometry = square(0.0, 100.0, 100.0);
        let expansion = square(0.0, 90.0, 30.0);

        let total = resolve_combat(
            &attacker_existing,
            &expansion,
            vec![victim("bob", victim_geometry.clone(), false)],
            InfluenceRule::TotalInfluence,
        )
        .expect("combat resolves");
        let new_only = resolve_combat(
            &attacker_existing,
            &expansion,
            vec![victim("bob", victim_geometry, false)],
            InfluenceRule::NewPolygonOnly,
        )
        .expect("combat resolves");

        let total_remaining = area_m2(&total.victims[0].geometry);
        let new_only_remaining = area_m2(&new_only.victims[0].geometry);
        assert!(total_remaining < new_only_remaining);
    }
}
