//! In-process translation cache keyed by a normalized fingerprint of
//! (text, source language, target language).
//!
//! Entries are only ever evicted by age: a lookup that finds an expired entry
//! removes it, and `sweep_expired` clears every expired entry at once. There is
//! no size bound or LRU policy; the cache is sized for a single interactive
//! session where the TTL alone keeps it small. Long-running hosts translating
//! unbounded distinct inputs should call `sweep_expired` on a schedule.

mod repair;

use crate::config::LanguageCode;
use crate::translate::Meaning;
use crate::util::clock::{age, Clock, SystemClock};
use repair::Repair;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

const LOG_TARGET: &str = "cache";

/// Fingerprint of a translation request. Case-insensitive on the source text
/// only; language codes are used verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(text: &str, source: &LanguageCode, target: &LanguageCode) -> Self {
        Self(format!(
            "{}\u{1f}{}\u{1f}{}",
            text.to_lowercase(),
            source.as_str(),
            target.as_str()
        ))
    }
}

/// Immutable once created; updates replace the whole entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub translation: String,
    pub meanings: Vec<Meaning>,
    pub created_at: SystemTime,
}

pub struct TranslationCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TranslationCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &CacheEntry, now: SystemTime) -> bool {
        age(now, entry.created_at) >= self.ttl
    }

    /// Returns the live entry for the fingerprint, if any.
    ///
    /// Expired entries are removed. A translation that was stored still
    /// percent-encoded is decoded and written back; one that cannot be decoded
    /// is evicted and reported as a miss.
    pub fn lookup(
        &self,
        text: &str,
        source: &LanguageCode,
        target: &LanguageCode,
    ) -> Option<CacheEntry> {
        let key = CacheKey::new(text, source, target);
        let now = self.clock.now();
        let mut entries = self.entries();

        let entry = entries.get(&key)?.clone();
        if self.is_expired(&entry, now) {
            tracing::debug!(target: LOG_TARGET, target_lang = %target, "expired entry evicted");
            entries.remove(&key);
            return None;
        }

        let repaired = match repair::repair(&entry.translation) {
            Repair::Clean => return Some(entry.clone()),
            Repair::Decoded(text) => CacheEntry {
                translation: text.into_owned(),
                meanings: entry.meanings.clone(),
                created_at: entry.created_at,
            },
            Repair::Corrupt => {
                tracing::warn!(target: LOG_TARGET, target_lang = %target, "undecodable cached translation evicted");
                entries.remove(&key);
                return None;
            }
        };

        tracing::debug!(target: LOG_TARGET, target_lang = %target, "repaired percent-encoded cache entry");
        entries.insert(key, repaired.clone());
        Some(repaired)
    }

    /// Stores a fresh entry, replacing whatever was there.
    pub fn store(
        &self,
        text: &str,
        source: &LanguageCode,
        target: &LanguageCode,
        translation: String,
        meanings: Vec<Meaning>,
    ) {
        let entry = CacheEntry {
            translation,
            meanings,
            created_at: self.clock.now(),
        };
        self.entries()
            .insert(CacheKey::new(text, source, target), entry);
    }

    /// Replaces the meanings of a live entry, keeping its age. No-op if the
    /// entry is gone.
    pub fn attach_meanings(
        &self,
        text: &str,
        source: &LanguageCode,
        target: &LanguageCode,
        meanings: Vec<Meaning>,
    ) {
        let key = CacheKey::new(text, source, target);
        let mut entries = self.entries();
        if let Some(existing) = entries.get(&key) {
            let replaced = CacheEntry {
                translation: existing.translation.clone(),
                meanings,
                created_at: existing.created_at,
            };
            entries.insert(key, replaced);
        }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| age(now, entry.created_at) < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(target: LOG_TARGET, removed, "swept expired entries");
        }
        removed
    }

    /// Sweeps with the given probability so the cost is amortized across calls.
    pub fn maybe_sweep(&self, probability: f64) -> Option<usize> {
        if probability > 0.0 && rand::random::<f64>() < probability {
            Some(self.sweep_expired())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn insert_raw(&self, text: &str, source: &LanguageCode, target: &LanguageCode, raw: &str) {
        self.store(text, source, target, raw.to_owned(), Vec::new());
    }
}
