use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub fn time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seed used when a configuration leaves its seed unset.
pub fn seed_or_clock(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(time)
}
