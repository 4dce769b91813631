use crate::config::{ApiKey, LanguageCode, ProviderConfig};
use crate::translate::{Meaning, ProviderError, Translator};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

const LOG_TARGET: &str = "translate::http";

/// Translator backed by a LibreTranslate-compatible JSON endpoint, with an
/// optional dictionary endpoint for word glosses.
#[derive(Clone)]
pub struct HttpTranslator {
    client: Client,
    endpoint: Url,
    gloss_endpoint: Option<Url>,
    api_key: Option<ApiKey>,
}

impl HttpTranslator {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let endpoint = Url::parse(&config.endpoint)?;
        let gloss_endpoint = config
            .gloss_endpoint
            .as_deref()
            .map(Url::parse)
            .transpose()?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            gloss_endpoint,
            api_key: config.api_key.clone(),
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

#[derive(Deserialize)]
struct GlossEntry {
    #[serde(default)]
    phonetic: Option<String>,
    #[serde(default)]
    meanings: Vec<GlossMeaning>,
}

#[derive(Deserialize)]
struct GlossMeaning {
    #[serde(rename = "partOfSpeech", default)]
    part_of_speech: String,
    #[serde(default)]
    definitions: Vec<GlossDefinition>,
}

#[derive(Deserialize)]
struct GlossDefinition {
    definition: String,
}

fn parse_translation(body: &str) -> Result<String, ProviderError> {
    let parsed: TranslateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse JSON: {e}")))?;
    match parsed.translated_text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::InvalidResponse(
            "missing translatedText field".to_string(),
        )),
    }
}

fn parse_glosses(body: &str) -> Vec<Meaning> {
    let entries: Vec<GlossEntry> = match serde_json::from_str(body) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(target: LOG_TARGET, error = %e, "unparseable gloss payload");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .flat_map(|entry| {
            let phonetic = entry.phonetic;
            entry.meanings.into_iter().filter_map(move |m| {
                let first = m.definitions.into_iter().next()?;
                Some(Meaning {
                    translation: first.definition,
                    part_of_speech: m.part_of_speech,
                    pronunciation: phonetic.clone(),
                })
            })
        })
        .collect()
}

fn gloss_url(base: &Url, lang: &str, word: &str) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push(lang)
        .push(word);
    Some(url)
}

impl Translator for HttpTranslator {
    fn translate_once(
        &self,
        text: String,
        source: LanguageCode,
        target: LanguageCode,
    ) -> BoxFuture<'_, Result<String, ProviderError>> {
        async move {
            let request = TranslateRequest {
                q: &text,
                source: source.as_str(),
                target: target.as_str(),
                format: "text",
                api_key: self.api_key.as_ref().map(ApiKey::expose),
            };

            let response = self
                .client
                .post(self.endpoint.clone())
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            parse_translation(&body)
        }
        .boxed()
    }

    fn fetch_gloss(&self, word: String, lang: LanguageCode) -> BoxFuture<'_, Vec<Meaning>> {
        async move {
            let Some(base) = &self.gloss_endpoint else {
                return Vec::new();
            };
            let Some(url) = gloss_url(base, lang.as_str(), &word) else {
                tracing::warn!(target: LOG_TARGET, %base, "gloss endpoint cannot take path segments");
                return Vec::new();
            };

            let response = match self.client.get(url).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(target: LOG_TARGET, error = %e, "gloss lookup failed");
                    return Vec::new();
                }
            };
            if response.status() == StatusCode::NOT_FOUND {
                return Vec::new();
            }
            if !response.status().is_success() {
                tracing::debug!(target: LOG_TARGET, status = %response.status(), "gloss lookup rejected");
                return Vec::new();
            }
            match response.text().await {
                Ok(body) => parse_glosses(&body),
                Err(e) => {
                    tracing::debug!(target: LOG_TARGET, error = %e, "gloss body unreadable");
                    Vec::new()
                }
            }
        }
        .boxed()
    }
}
