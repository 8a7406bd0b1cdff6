//! Time-bounded fingerprint cache backing duplicate suppression.
//!
//! The cache answers one question: "has this exact event or response been
//! seen within its suppression window?" Claims are a single check-and-set
//! under one lock so two near-simultaneous deliveries of the same payload
//! cannot both proceed. Sweeping is the only eviction path; `get` never
//! evicts, so live size stays bounded by arrival rate × window plus one
//! sweep interval of slack.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Default suppression window for inbound event fingerprints.
pub const DEFAULT_EVENT_FINGERPRINT_WINDOW_MS: u64 = 120_000;

/// Default suppression window for outbound response fingerprints.
pub const DEFAULT_RESPONSE_FINGERPRINT_WINDOW_MS: u64 = 60_000;

/// Default interval between background sweep passes.
pub const DEFAULT_FINGERPRINT_SWEEP_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Lifecycle of a fingerprint: claimed while work is in flight, then settled.
pub enum FingerprintState {
    Pending,
    Processed,
}

impl FingerprintState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub key: String,
    pub first_seen_at_ms: u64,
    pub state: FingerprintState,
    /// Short payload excerpt, diagnostics only.
    pub payload_digest: String,
}

#[derive(Debug, Clone, Copy)]
pub struct FingerprintCacheConfig {
    pub window_ms: u64,
}

impl FingerprintCacheConfig {
    pub fn event_default() -> Self {
        Self {
            window_ms: DEFAULT_EVENT_FINGERPRINT_WINDOW_MS,
        }
    }

    pub fn response_default() -> Self {
        Self {
            window_ms: DEFAULT_RESPONSE_FINGERPRINT_WINDOW_MS,
        }
    }
}

#[derive(Debug)]
/// Key-addressable record of recently seen fingerprints with expiry.
pub struct FingerprintCache {
    window_ms: u64,
    entries: Mutex<HashMap<String, FingerprintEntry>>,
}

impl FingerprintCache {
    pub fn new(config: FingerprintCacheConfig) -> Self {
        Self {
            window_ms: config.window_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Unconditional overwrite; callers needing check-then-act use [`claim`].
    ///
    /// [`claim`]: FingerprintCache::claim
    pub fn put(&self, key: &str, state: FingerprintState, payload_digest: &str, now_ms: u64) {
        let mut entries = self.lock_entries();
        entries.insert(
            key.to_string(),
            FingerprintEntry {
                key: key.to_string(),
                first_seen_at_ms: now_ms,
                state,
                payload_digest: payload_digest.to_string(),
            },
        );
    }

    /// Read-only lookup; never evicts, expired entries are reported as-is.
    pub fn get(&self, key: &str) -> Option<FingerprintEntry> {
        self.lock_entries().get(key).cloned()
    }

    /// Atomically reserves `key` unless a live entry already holds it.
    ///
    /// Returns `false` without mutating when the key is present and still
    /// inside its window. An expired-but-unswept entry does not block the
    /// claim; it is overwritten in place.
    pub fn claim(&self, key: &str, payload_digest: &str, now_ms: u64) -> bool {
        let mut entries = self.lock_entries();
        if let Some(existing) = entries.get(key) {
            if !self.is_entry_expired(existing, now_ms) {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            FingerprintEntry {
                key: key.to_string(),
                first_seen_at_ms: now_ms,
                state: FingerprintState::Pending,
                payload_digest: payload_digest.to_string(),
            },
        );
        true
    }

    /// Upgrades a claimed key to `Processed`, keeping its first-seen time.
    ///
    /// Returns `false` when the key is no longer present (already swept).
    pub fn mark_processed(&self, key: &str) -> bool {
        let mut entries = self.lock_entries();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.state = FingerprintState::Processed;
                true
            }
            None => false,
        }
    }

    /// Removes every entry whose window elapsed before `now_ms`; the only
    /// eviction path. Returns the number of removed entries.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_entry_expired(entry, now_ms));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn is_entry_expired(&self, entry: &FingerprintEntry, now_ms: u64) -> bool {
        entry.first_seen_at_ms.saturating_add(self.window_ms) <= now_ms
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, FingerprintEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
