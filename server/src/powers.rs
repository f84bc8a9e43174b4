use chrono::{DateTime, Utc};
use landrush_shared::PowerKind;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{PowerError, StoreError};
use crate::store::{self, PgTransaction};

/// JSONB shape of the `superpowers` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerSet {
    #[serde(default)]
    pub owned: Vec<PowerKind>,
}

/// Insert a power keeping the set free of duplicates. Returns whether the
/// set changed.
pub fn add_unique(owned: &mut Vec<PowerKind>, power: PowerKind) -> bool {
    if owned.contains(&power) {
        return false;
    }
    owned.push(power);
    true
}

/// Remove a power if present. Returns whether the set changed.
pub fn remove(owned: &mut Vec<PowerKind>, power: PowerKind) -> bool {
    let before = owned.len();
    owned.retain(|p| *p != power);
    owned.len() != before
}

pub fn unowned(owned: &[PowerKind]) -> Vec<PowerKind> {
    PowerKind::ALL
        .into_iter()
        .filter(|p| !owned.contains(p))
        .collect()
}

/// Read the owned set, locking the owner row for the transaction.
pub async fn load_owned_for_update(
    tx: &mut PgTransaction,
    owner_id: &str,
) -> Result<Vec<PowerKind>, PowerError> {
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT superpowers FROM territories WHERE owner_id = $1 FOR UPDATE")
            .bind(owner_id)
            .fetch_optional(&mut **tx)
            .await?;
    let Some(value) = value else {
        return Err(PowerError::MissingPlayer);
    };
    let set: PowerSet =
        serde_json::from_value(value).map_err(|e| PowerError::Store(StoreError::corrupt(e)))?;
    Ok(set.owned)
}

async fn save_owned(
    tx: &mut PgTransaction,
    owner_id: &str,
    owned: &[PowerKind],
) -> Result<(), PowerError> {
    let value = serde_json::to_value(PowerSet {
        owned: owned.to_vec(),
    })
    .map_err(|e| PowerError::Store(StoreError::corrupt(e)))?;
    sqlx::query("UPDATE territories SET superpowers = $2 WHERE owner_id = $1")
        .bind(owner_id)
        .bind(value)
        .execute(&mut **tx)
        .await
        .map_err(PowerError::Db)?;
    Ok(())
}

/// Open a purchase order. Rejected when the power is already owned.
pub async fn create_order(
    pool: &PgPool,
    owner_id: &str,
    power: PowerKind,
) -> Result<Uuid, PowerError> {
    let mut tx = pool.begin().await?;
    let owned = load_owned_for_update(&mut tx, owner_id).await?;
    if owned.contains(&power) {
        return Err(PowerError::AlreadyOwned);
    }
    let order_id = Uuid::new_v4();
    sqlx::query("INSERT INTO power_orders (id, player_id, item_id) VALUES ($1, $2, $3)")
        .bind(order_id)
        .bind(owner_id)
        .bind(power.as_str())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(order_id)
}

/// Idempotent grant after the payment gateway reported a verified payment.
pub async fn grant_after_payment(
    pool: &PgPool,
    owner_id: &str,
    power: PowerKind,
    verified_payment: bool,
) -> Result<(), PowerError> {
    if !verified_payment {
        return Err(PowerError::PaymentNotVerified);
    }
    let mut tx = pool.begin().await?;
    let mut owned = load_owned_for_update(&mut tx, owner_id).await?;
    if add_unique(&mut owned, power) {
        save_owned(&mut tx, owner_id, &owned).await?;
        if power == PowerKind::LastStand {
            sqlx::query("UPDATE territories SET shield_owned = TRUE WHERE owner_id = $1")
                .bind(owner_id)
                .execute(&mut *tx)
                .await?;
        }
    }
    sqlx::query("UPDATE power_orders SET granted = TRUE WHERE player_id = $1 AND item_id = $2")
        .bind(owner_id)
        .bind(power.as_str())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Grant a batch inside an enclosing transaction (chest pickups). Returns
/// the powers actually added.
pub async fn grant_powers_tx(
    tx: &mut PgTransaction,
    owner_id: &str,
    powers: &[PowerKind],
) -> Result<Vec<PowerKind>, PowerError> {
    let mut owned = load_owned_for_update(tx, owner_id).await?;
    let mut granted = Vec::new();
    for power in powers {
        if add_unique(&mut owned, *power) {
            granted.push(*power);
        }
    }
    if !granted.is_empty() {
        save_owned(tx, owner_id, &owned).await?;
        if granted.contains(&PowerKind::LastStand) {
            sqlx::query("UPDATE territories SET shield_owned = TRUE WHERE owner_id = $1")
                .bind(owner_id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(granted)
}

/// Activate an owned power. Last stand arms the shield and stays owned
/// until the first damaging hit consumes it; every other power leaves the
/// owned set here and lives on as a run-scoped session flag.
pub async fn activate(
    pool: &PgPool,
    owner_id: &str,
    power: PowerKind,
    now: DateTime<Utc>,
) -> Result<(), PowerError> {
    let mut tx = pool.begin().await?;
    let mut owned = load_owned_for_update(&mut tx, owner_id).await?;
    if !owned.contains(&power) {
        return Err(PowerError::NotOwned);
    }
    if power == PowerKind::LastStand {
        store::arm_shield(&mut tx, owner_id, now).await?;
    } else {
        remove(&mut owned, power);
        save_owned(&mut tx, owner_id, &owned).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Consume a power inside an enclosing transaction. A no-op when the power
/// is not owned. For last stand both shield flags clear with the power.
pub async fn consume(
    tx: &mut PgTransaction,
    owner_id: &str,
    power: PowerKind,
) -> Result<(), PowerError> {
    let mut owned = match load_owned_for_update(tx, owner_id).await {
        Ok(owned) => owned,
        Err(PowerError::MissingPlayer) => return Ok(()),
        Err(e) => return Err(e),
    };
    if remove(&mut owned, power) {
        save_owned(tx, owner_id, &owned).await?;
    }
    if power == PowerKind::LastStand {
        sqlx::query(
            "UPDATE territories SET shield_owned = FALSE, shield_active = FALSE \
             WHERE owner_id = $1",
        )
        .bind(owner_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_unique_refuses_duplicates() {
        let mut owned = vec![PowerKind::GhostRunner];
        assert!(!add_unique(&mut owned, PowerKind::GhostRunner));
        assert_eq!(owned.len(), 1);
        assert!(add_unique(&mut owned, PowerKind::LastStand));
        assert_eq!(owned.len(), 2);
    }

    #[test]
    fn remove_of_absent_power_is_a_no_op() {
        let mut owned = vec![PowerKind::LastStand];
        assert!(!remove(&mut owned, PowerKind::Infiltrator));
        assert_eq!(owned, vec![PowerKind::LastStand]);
    }

    #[test]
    fn unowned_complements_the_owned_set() {
        let owned = vec![PowerKind::LastStand, PowerKind::TrailDefense];
        let rest = unowned(&owned);
        assert_eq!(rest, vec![PowerKind::Infiltrator, PowerKind::GhostRunner]);
    }

    #[test]
    fn power_set_json_matches_the_persisted_shape() {
        let set = PowerSet {
            owned: vec![PowerKind::LastStand],
        };
        let json = serde_json::to_string(&set).expect("serialize power set");
        assert_eq!(json, r#"{"owned":["lastStand"]}"#);
        let empty: PowerSet = serde_json::from_str("{}").expect("empty set parses");
        assert!(empty.owned.is_empty());
    }
}
