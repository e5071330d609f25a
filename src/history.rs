//! Local mirror of recent generations.
//!
//! The backend owns the real history; this cache only exists so the history
//! screen renders instantly and offline. Entries expire after a day and the
//! cache is capped, so it can never grow without bound. It persists as JSON
//! through the storage capability and degrades to empty on any load problem.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::GenerationOutcome;
use crate::modes::{MediaKind, Mode};

/// Entries older than this are invisible and pruned on the next write.
pub const HISTORY_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Hard cap on stored entries, newest first.
pub const MAX_HISTORY_ITEMS: usize = 20;

/// Storage key under which the cache persists.
pub const HISTORY_STORAGE_KEY: &str = "avatar_generations";

/// One finished generation with a viewable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub mode: Mode,
    pub media: MediaKind,
    pub result_url: String,
    #[serde(default)]
    pub prompt: String,
    pub created_at_ms: u64,
}

impl HistoryEntry {
    /// Builds an entry from a generation outcome; chat deliveries have no
    /// URL to revisit and produce nothing.
    #[must_use]
    pub fn from_outcome(
        mode: Mode,
        outcome: &GenerationOutcome,
        prompt: &str,
        now_ms: u64,
    ) -> Option<Self> {
        match outcome {
            GenerationOutcome::Media { media, url } => Some(Self {
                mode,
                media: *media,
                result_url: url.clone(),
                prompt: prompt.to_owned(),
                created_at_ms: now_ms,
            }),
            GenerationOutcome::SentToChat => None,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > HISTORY_TTL_MS
    }
}

/// Bounded, TTL-aware history cache. Newest entries first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCache {
    entries: Vec<HistoryEntry>,
}

impl HistoryCache {
    /// Restores the cache from persisted bytes, empty on any mismatch.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(cache) => cache,
            Err(e) => {
                warn!(error = %e, "discarding unreadable history cache");
                Self::default()
            }
        }
    }

    /// Serialized form for the storage capability.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing plain owned data cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Inserts at the front, pruning expired entries and enforcing the cap.
    pub fn add(&mut self, entry: HistoryEntry, now_ms: u64) {
        self.entries.retain(|e| !e.is_expired(now_ms));
        self.entries.insert(0, entry);
        self.entries.truncate(MAX_HISTORY_ITEMS);
    }

    /// Entries still within the TTL, without mutating the store.
    #[must_use]
    pub fn visible(&self, now_ms: u64) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_expired(now_ms))
            .collect()
    }

    pub fn remove_by_url(&mut self, result_url: &str) {
        self.entries.retain(|e| e.result_url != result_url);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
