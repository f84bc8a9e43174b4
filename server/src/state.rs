use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use landrush_shared::{LatLng, ServerEvent};
use sqlx::PgPool;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;
use uuid::Uuid;

use crate::config::broadcast_buffer;
use crate::conquest::ConquestManager;
use crate::geofence::GeofenceService;
use crate::session::PlayerSession;
use crate::trail::TrailEngine;

/// Active superpower chest mirrored from the database.
#[derive(Debug, Clone)]
pub struct Chest {
    pub id: Uuid,
    pub location: LatLng,
    pub active: bool,
}

/// Public event serialized once by the producer and shared by every
/// subscriber via Arc.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub seq: u64,
    pub event: Arc<ServerEvent>,
    pub json: Arc<Bytes>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub players: Arc<DashMap<String, PlayerSession>>,
    pub trails: TrailEngine,
    pub conquests: ConquestManager,
    pub geofence: GeofenceService,
    pub chests: Arc<RwLock<HashMap<Uuid, Chest>>>,
    pub event_tx: broadcast::Sender<BroadcastEvent>,
    pub next_seq: Arc<AtomicU64>,
    pub observability: Arc<ObservabilityCounters>,
}

impl AppState {
    pub fn new(db: PgPool) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_buffer());
        Self {
            db,
            players: Arc::new(DashMap::new()),
            trails: TrailEngine::new(),
            conquests: ConquestManager::new(),
            geofence: GeofenceService::new(),
            chests: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            observability: Arc::new(ObservabilityCounters::default()),
        }
    }

    /// Publish a public event to every connected session. Serialized once;
    /// slow receivers lag out of the buffer rather than stalling the sender.
    pub fn broadcast(&self, event: ServerEvent) {
        let json = match serde_json::to_vec(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast event; dropping");
                self.observability.record_dropped_broadcast_events(1);
                return;
            }
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.event_tx.send(BroadcastEvent {
            seq,
            event: Arc::new(event),
            json: Arc::new(Bytes::from(json)),
        });
    }

    /// Deliver an event to one player's session queue, ahead of any public
    /// broadcast published afterwards.
    pub fn send_to(&self, player_id: &str, event: ServerEvent) {
        if let Some(session) = self.players.get(player_id) {
            let _ = session.direct.send(Arc::new(event));
        }
    }
}

#[derive(Debug, Default)]
pub struct ObservabilityCounters {
    claims_committed_total: AtomicU64,
    claims_rejected_total: AtomicU64,
    trail_cuts_total: AtomicU64,
    conquests_finalized_total: AtomicU64,
    chests_claimed_total: AtomicU64,
    persist_failures_total: AtomicU64,
    dropped_broadcast_events_total: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ObservabilitySnapshot {
    pub claims_committed_total: u64,
    pub claims_rejected_total: u64,
    pub trail_cuts_total: u64,
    pub conquests_finalized_total: u64,
    pub chests_claimed_total: u64,
    pub persist_failures_total: u64,
    pub dropped_broadcast_events_total: u64,
}

impl ObservabilityCounters {
    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            claims_committed_total: self.claims_committed_total.load(Ordering::Relaxed),
            claims_rejected_total: self.claims_rejected_total.load(Ordering::Relaxed),
            trail_cuts_total: self.trail_cuts_total.load(Ordering::Relaxed),
            conquests_finalized_total: self.conquests_finalized_total.load(Ordering::Relaxed),
            chests_claimed_total: self.chests_claimed_total.load(Ordering::Relaxed),
            persist_failures_total: self.persist_failures_total.load(Ordering::Relaxed),
            dropped_broadcast_events_total: self
                .dropped_broadcast_events_total
                .load(Ordering::Relaxed),
        }
    }

    pub fn record_claim_committed(&self) {
        self.claims_committed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_rejected(&self) {
        self.claims_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trail_cut(&self) {
        self.trail_cuts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conquest_finalized(&self) {
        self.conquests_finalized_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chest_claimed(&self) {
        self.chests_claimed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_broadcast_events(&self, count: u64) {
        self.dropped_broadcast_events_total
            .fetch_add(count, Ordering::Relaxed);
    }
}
