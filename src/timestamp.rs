use std::time::{SystemTime, UNIX_EPOCH};

const NANOS_THRESHOLD: i64 = 1_000_000_000_000_000_000;
const MICROS_THRESHOLD: i64 = 1_000_000_000_000_000;
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;
const SECONDS_THRESHOLD: i64 = 1_000_000_000;

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Normalize a client timestamp to nanoseconds, detecting its unit by
/// magnitude. Anything that is not an integer above 1e9 is replaced by the
/// current time.
pub fn parse_timestamp(raw: &str) -> i64 {
    match detect_unit(raw) {
        Some(ts) => ts,
        None => {
            log::warn!("invalid timestamp {raw:?}, using current time instead");
            now_ns()
        }
    }
}

/// Like [`parse_timestamp`] but without the fallback.
pub fn detect_unit(raw: &str) -> Option<i64> {
    let ts = raw.trim().parse::<i64>().ok()?;
    match ts {
        ts if ts > NANOS_THRESHOLD => Some(ts),
        ts if ts > MICROS_THRESHOLD => ts.checked_mul(1_000),
        ts if ts > MILLIS_THRESHOLD => ts.checked_mul(1_000_000),
        ts if ts > SECONDS_THRESHOLD => ts.checked_mul(1_000_000_000),
        _ => None,
    }
}
