use crate::config::LanguageCode;
use crate::sinks::{Favorite, FavoritesSink, HistoryRecord, HistorySink};
use std::collections::VecDeque;
use std::sync::Mutex;

/// History kept in memory, newest first. Once `capacity` is reached the
/// oldest record is dropped.
pub struct MemoryHistory {
    records: Mutex<VecDeque<HistoryRecord>>,
    capacity: usize,
}

impl MemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistorySink for MemoryHistory {
    fn add_to_history(&self, record: HistoryRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push_front(record);
        records.truncate(self.capacity);
    }
}

#[derive(Default)]
pub struct MemoryFavorites {
    items: Mutex<Vec<Favorite>>,
}

impl MemoryFavorites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Favorite> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, source_text: &str, source: &LanguageCode, target: &LanguageCode) -> bool {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|f| {
                f.source_text == source_text
                    && f.source_language.same_as(source)
                    && f.target_language.same_as(target)
            })
    }

    pub fn remove(&self, source_text: &str, source: &LanguageCode, target: &LanguageCode) -> bool {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let before = items.len();
        items.retain(|f| {
            !(f.source_text == source_text
                && f.source_language.same_as(source)
                && f.target_language.same_as(target))
        });
        items.len() != before
    }
}

impl FavoritesSink for MemoryFavorites {
    fn add_favorite(&self, favorite: Favorite) -> bool {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if items.iter().any(|f| f.same_entry(&favorite)) {
            tracing::debug!(target: "sinks::favorites", source_text = %favorite.source_text, "duplicate favorite ignored");
            return false;
        }
        items.push(favorite);
        true
    }
}
