//! Collaborators the orchestrator talks to but does not own: the usage
//! quota, the history log and the favorites list.

mod memory;
mod usage;

use crate::config::LanguageCode;
use crate::translate::TranslationResult;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub use memory::{MemoryFavorites, MemoryHistory};
pub use usage::{DailyUsageGate, UnlimitedGate};

pub const MULTIPLE_TARGETS: &str = "multiple";

pub trait UsageGate: Send + Sync {
    /// Consulted once before a batch starts; `unit_cost` is the number of units.
    fn can_translate(&self, unit_cost: u32) -> bool;
    fn increment_usage(&self, count: u32);
}

pub trait HistorySink: Send + Sync {
    fn add_to_history(&self, record: HistoryRecord);
}

pub trait FavoritesSink: Send + Sync {
    /// Returns `false` when an equivalent favorite already exists.
    fn add_favorite(&self, favorite: Favorite) -> bool;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchedTranslation {
    pub lng: String,
    pub text: String,
}

/// One history entry per completed batch, listing every successful target.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub source_language: LanguageCode,
    pub target_language: String,
    pub source_text: String,
    pub translated_text: String,
    pub searched_data: Vec<SearchedTranslation>,
    pub created_at: SystemTime,
}

impl HistoryRecord {
    /// Builds the aggregate record from a batch's results, keeping only
    /// successful ones. Returns `None` if nothing succeeded.
    pub fn from_results<'a>(
        source_language: &LanguageCode,
        source_text: &str,
        results: impl IntoIterator<Item = &'a TranslationResult>,
        created_at: SystemTime,
    ) -> Option<Self> {
        let searched_data: Vec<SearchedTranslation> = results
            .into_iter()
            .filter(|r| r.is_success())
            .map(|r| SearchedTranslation {
                lng: r.target_language.as_str().to_owned(),
                text: r.translated_text.clone(),
            })
            .collect();

        if searched_data.is_empty() {
            return None;
        }

        Some(Self {
            source_language: source_language.clone(),
            target_language: MULTIPLE_TARGETS.to_owned(),
            source_text: source_text.to_owned(),
            translated_text: format!("{} translations", searched_data.len()),
            searched_data,
            created_at,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub source_text: String,
    pub translated_text: String,
    pub source_language: LanguageCode,
    pub target_language: LanguageCode,
}

impl Favorite {
    pub fn from_result(result: &TranslationResult) -> Self {
        Self {
            source_text: result.source_text.clone(),
            translated_text: result.translated_text.clone(),
            source_language: result.source_language.clone(),
            target_language: result.target_language.clone(),
        }
    }

    /// Favorites are unique per (source text, source language, target language).
    pub fn same_entry(&self, other: &Favorite) -> bool {
        self.source_text == other.source_text
            && self.source_language.same_as(&other.source_language)
            && self.target_language.same_as(&other.target_language)
    }
}
