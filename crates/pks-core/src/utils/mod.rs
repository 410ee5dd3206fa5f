//! Shared utilities.

mod hashing;
mod time;

pub use hashing::{digests_match, sha256_hex};
pub use time::{days_between, from_millis, now_utc, to_millis};
