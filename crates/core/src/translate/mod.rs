mod dummy;
mod http;
#[cfg(test)]
pub(crate) mod scripted;

use crate::config::LanguageCode;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub use dummy::DummyTranslator;
pub use http::HttpTranslator;

/// Confidence reported for any translation the provider produced.
pub const SUCCESS_CONFIDENCE: f32 = 0.9;

/// One alternate meaning of a word, as returned by a gloss lookup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meaning {
    pub translation: String,
    pub part_of_speech: String,
    pub pronunciation: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TranslationResult {
    pub source_language: LanguageCode,
    pub target_language: LanguageCode,
    pub source_text: String,
    pub translated_text: String,
    pub meanings: Vec<Meaning>,
    pub pronunciation: Option<String>,
    /// `0.0` iff the translation failed or was filtered.
    pub confidence: f32,
    pub timestamp: SystemTime,
}

impl TranslationResult {
    pub fn success(
        source_language: LanguageCode,
        target_language: LanguageCode,
        source_text: String,
        translated_text: String,
        meanings: Vec<Meaning>,
        timestamp: SystemTime,
    ) -> Self {
        let pronunciation = meanings.iter().find_map(|m| m.pronunciation.clone());
        Self {
            source_language,
            target_language,
            source_text,
            translated_text,
            meanings,
            pronunciation,
            confidence: SUCCESS_CONFIDENCE,
            timestamp,
        }
    }

    pub fn failed(
        source_language: LanguageCode,
        target_language: LanguageCode,
        source_text: String,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            source_language,
            target_language,
            source_text,
            translated_text: String::new(),
            meanings: Vec::new(),
            pronunciation: None,
            confidence: 0.0,
            timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        self.confidence > 0.0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("http error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl ProviderError {
    /// Whether the failure looks temporary (transport trouble, throttling, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Status { status, .. } => crate::util::is_http_retryable(*status),
            ProviderError::InvalidResponse(_) | ProviderError::InvalidEndpoint(_) => false,
        }
    }
}

/// A single-request translation backend. Implementations hold no per-request
/// state and never swallow failures: every transport, status or payload
/// problem comes back as a `ProviderError`.
pub trait Translator: Send + Sync {
    fn translate_once(
        &self,
        text: String,
        source: LanguageCode,
        target: LanguageCode,
    ) -> BoxFuture<'_, Result<String, ProviderError>>;

    /// Best-effort dictionary lookup. Missing data is an empty list, not an error.
    fn fetch_gloss(&self, _word: String, _lang: LanguageCode) -> BoxFuture<'_, Vec<Meaning>> {
        async { Vec::new() }.boxed()
    }
}

/// Glosses only make sense for a single word.
pub fn is_single_word(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && !trimmed.contains(char::is_whitespace)
}
