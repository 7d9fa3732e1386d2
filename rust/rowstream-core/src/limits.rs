use std::time::Duration;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_STREAMS: usize = 8192;

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Deadline applied to a call when neither the caller nor the session sets one.
///
/// Overridden with `ROWSTREAM_CALL_TIMEOUT_MS`.
pub fn call_timeout() -> Duration {
    let ms = env_number::<u64>("ROWSTREAM_CALL_TIMEOUT_MS")
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
    Duration::from_millis(ms)
}

/// Maximum number of open streams per [`Connection`](crate::Connection).
///
/// Overridden with `ROWSTREAM_MAX_STREAMS`.
pub fn max_streams() -> usize {
    env_number::<usize>("ROWSTREAM_MAX_STREAMS")
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_STREAMS)
}

/// Read a positive integer from the environment, falling back to `default`.
pub fn env_or(name: &str, default: usize) -> usize {
    env_number::<usize>(name)
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
