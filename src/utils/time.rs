//! Wall-clock helpers for packet-id timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in seconds, truncated to the 32-bit wire field
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
