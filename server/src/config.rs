use std::time::Duration;

pub const SERVER_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 3;
pub const SSE_KEEPALIVE_SECS: u64 = 15;

// Claim rules
pub const BASE_CLAIM_RADIUS_M: f64 = 30.0;
pub const CLAN_BASE_RADIUS_M: f64 = 56.42;
pub const MIN_CLAIM_AREA_M2: f64 = 100.0;
pub const WIPEOUT_THRESHOLD_M2: f64 = 1.0;
pub const CLAN_EXPANSION_START_RADIUS_M: f64 = 70.0;

// Trails and chests
pub const CHEST_PICKUP_RADIUS_M: f64 = 20.0;
pub const DISCONNECT_GRACE_SECS: u64 = 60;

// Conquest
pub const ARENA_TIMEOUT_SECS: i64 = 300;
pub const CONQUEST_TIMEOUT_SECS: i64 = 1800;
pub const ARENA_RADIUS_FACTOR: f64 = 1.5;
pub const LAP_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const LAP_SIMILARITY_KERNEL_M: f64 = 50.0;

// Background loops
pub const SHIELD_EXPIRY_HOURS: i64 = 48;
pub const POSITION_TICK_SECS: u64 = 5;
pub const SWEEP_INTERVAL_SECS: u64 = 30;

pub fn db_max_connections() -> u32 {
    std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
}

pub fn broadcast_buffer() -> usize {
    std::env::var("WS_BROADCAST_BUFFER")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

pub fn db_acquire_timeout() -> Duration {
    std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_max_connections_falls_back_on_garbage() {
        temp_env::with_var("DB_MAX_CONNECTIONS", Some("not-a-number"), || {
            assert_eq!(db_max_connections(), DEFAULT_DB_MAX_CONNECTIONS);
        });
        temp_env::with_var("DB_MAX_CONNECTIONS", Some("0"), || {
            assert_eq!(db_max_connections(), DEFAULT_DB_MAX_CONNECTIONS);
        });
    }

    #[test]
    fn broadcast_buffer_honors_override() {
        temp_env::with_var("WS_BROADCAST_BUFFER", Some("1024"), || {
            assert_eq!(broadcast_buffer(), 1024);
        });
    }

    #[test]
    fn db_acquire_timeout_parses_seconds() {
        temp_env::with_var("DB_ACQUIRE_TIMEOUT_SECS", Some("7"), || {
            assert_eq!(db_acquire_timeout(), Duration::from_secs(7));
        });
    }
}
