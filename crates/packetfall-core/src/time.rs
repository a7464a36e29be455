use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Wall-clock time as Unix epoch milliseconds (wire `timestamp` fields).
pub fn unix_millis() -> u64 {
    since_epoch().as_millis() as u64
}

/// Wall-clock time as fractional Unix epoch seconds (wire `death_time`).
pub fn unix_secs_f64() -> f64 {
    since_epoch().as_secs_f64()
}
