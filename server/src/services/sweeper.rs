use std::time::Duration;

use chrono::{TimeDelta, Utc};
use landrush_shared::ServerEvent;
use tracing::{info, warn};

use crate::config::{SHIELD_EXPIRY_HOURS, SWEEP_INTERVAL_SECS};
use crate::state::AppState;
use crate::store;

/// Periodic expiry sweep: 48 h shields, 5 min arenas, 30 min conquests and
/// past-deadline quests.
pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    loop {
        interval.tick().await;
        let now = Utc::now();

        let cutoff = now - TimeDelta::hours(SHIELD_EXPIRY_HOURS);
        match store::expire_shields(&state.db, cutoff).await {
            Ok(owners) => {
                if !owners.is_empty() {
                    info!(count = owners.len(), "expired stale shields");
                }
                for owner in owners {
                    state.send_to(&owner, ServerEvent::ShieldExpired);
                }
            }
            Err(e) => {
                state.observability.record_persist_failure();
                warn!(error = %e, "shield expiry sweep failed");
            }
        }

        match store::deactivate_expired_quests(&state.db).await {
            Ok(0) => {}
            Ok(count) => info!(count, "deactivated expired quests"),
            Err(e) => {
                state.observability.record_persist_failure();
                warn!(error = %e, "quest expiry sweep failed");
            }
        }

        state.conquests.sweep(&state, now);
    }
}
