use crate::config::LanguageCode;
use crate::translate::{ProviderError, Translator};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Offline translator: tags the text with the target language instead of
/// calling a provider.
#[derive(Clone)]
pub struct DummyTranslator;

impl DummyTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DummyTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator for DummyTranslator {
    fn translate_once(
        &self,
        text: String,
        _source: LanguageCode,
        target: LanguageCode,
    ) -> BoxFuture<'_, Result<String, ProviderError>> {
        async move { Ok(format!("[{target}] {text}")) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tags_text_with_target() {
        let t = DummyTranslator::new();
        let out = t
            .translate_once(
                "hello".into(),
                LanguageCode::new("en").expect("valid"),
                LanguageCode::new("ko").expect("valid"),
            )
            .await
            .expect("dummy never fails");
        assert_eq!(out, "[ko] hello");
    }
}
