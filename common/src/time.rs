use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the epoch, used for timestamps that must be
/// comparable across the client/server boundary (§4.7 `TimedObservation` /
/// `TimedAction`).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Wall-clock seconds as a float, used for the wire timestamps in §4.7/§8-S5
/// (comparable across hosts, unlike `Instant`).
pub fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs_f64()
}
