//! Adaptive polling schedule for push status queries

use std::time::Duration;

/// Wait before the first status query
pub const INITIAL_DELAY_MS: u64 = 10_000;
/// Base poll delay; grown before each use
pub const BASE_POLL_DELAY_MS: u64 = 8_000;
pub const MAX_PENDING_DELAY_MS: u64 = 30_000;
pub const MAX_ERROR_DELAY_MS: u64 = 20_000;
pub const RATE_LIMIT_DELAY_MS: u64 = 30_000;
pub const MAX_ATTEMPTS: u32 = 12;

/// Gateway result codes that end a push without payment (cancelled by
/// user, insufficient balance, wrong PIN, timeouts on the handset ...)
pub const FAILURE_CODES: [i64; 6] = [1032, 1, 17, 26, 1031, 1037];

/// What a final gateway result code means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Confirmed,
    Failed,
    /// Unknown code: keep polling
    Undetermined,
}

pub fn classify_result(code: i64) -> ResultClass {
    if code == 0 {
        ResultClass::Confirmed
    } else if FAILURE_CODES.contains(&code) {
        ResultClass::Failed
    } else {
        ResultClass::Undetermined
    }
}

/// Delay after a pending answer (x1.5, capped)
pub fn after_pending(delay_ms: u64) -> u64 {
    (delay_ms * 3 / 2).min(MAX_PENDING_DELAY_MS)
}

/// Delay after a transport failure (x1.3, capped)
pub fn after_error(delay_ms: u64) -> u64 {
    (delay_ms * 13 / 10).min(MAX_ERROR_DELAY_MS)
}

pub fn after_rate_limit(retry_after: Option<Duration>) -> u64 {
    retry_after
        .map(|d| d.as_millis() as u64)
        .filter(|ms| *ms > 0)
        .unwrap_or(RATE_LIMIT_DELAY_MS)
}
