//! Shared error types and small helpers.

pub mod errors;

/// Seconds of clock skew tolerated when checking `exp` and `iat` claims.
pub const EXPIRATION_SKEW_SECS: i64 = 60;

/// Current unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
