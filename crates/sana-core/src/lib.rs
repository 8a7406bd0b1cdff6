//! Foundational low-level utilities shared across Sana crates.
//!
//! Provides atomic file-write helpers and time utilities used by journal
//! persistence, snapshot files, and fingerprint expiry calculations.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix_ms};
