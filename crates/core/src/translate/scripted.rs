//! Programmable translator for engine tests.

use crate::config::LanguageCode;
use crate::translate::{Meaning, ProviderError, Translator};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Ok(String),
    Fail(String),
}

#[derive(Default)]
struct Script {
    delays: HashMap<String, Duration>,
    outcomes: HashMap<String, VecDeque<Outcome>>,
    glosses: HashMap<String, Vec<Meaning>>,
    calls: HashMap<String, usize>,
    gloss_calls: usize,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedTranslator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTranslator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every call for `target` takes `delay` before answering.
    pub(crate) fn delay(self, target: &str, delay: Duration) -> Self {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(target.to_owned(), delay);
        self
    }

    /// Queue the next answer for `target`. Once the queue is drained the
    /// last answer repeats.
    pub(crate) fn then(self, target: &str, outcome: Outcome) -> Self {
        self.script
            .lock()
            .unwrap()
            .outcomes
            .entry(target.to_owned())
            .or_default()
            .push_back(outcome);
        self
    }

    pub(crate) fn ok(self, target: &str, text: &str) -> Self {
        self.then(target, Outcome::Ok(text.to_owned()))
    }

    pub(crate) fn fail(self, target: &str, message: &str) -> Self {
        self.then(target, Outcome::Fail(message.to_owned()))
    }

    pub(crate) fn gloss(self, target: &str, meanings: Vec<Meaning>) -> Self {
        self.script
            .lock()
            .unwrap()
            .glosses
            .insert(target.to_owned(), meanings);
        self
    }

    pub(crate) fn calls(&self, target: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.script.lock().unwrap().calls.values().sum()
    }

    pub(crate) fn gloss_calls(&self) -> usize {
        self.script.lock().unwrap().gloss_calls
    }
}

impl Translator for ScriptedTranslator {
    fn translate_once(
        &self,
        text: String,
        _source: LanguageCode,
        target: LanguageCode,
    ) -> BoxFuture<'_, Result<String, ProviderError>> {
        async move {
            let (delay, outcome) = {
                let mut script = self.script.lock().unwrap();
                *script.calls.entry(target.as_str().to_owned()).or_default() += 1;
                let delay = script
                    .delays
                    .get(target.as_str())
                    .copied()
                    .unwrap_or_default();
                let outcome = match script.outcomes.get_mut(target.as_str()) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                };
                (delay, outcome)
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match outcome {
                Some(Outcome::Ok(t)) => Ok(t),
                Some(Outcome::Fail(msg)) => Err(ProviderError::InvalidResponse(msg)),
                None => Ok(format!("{text}@{target}")),
            }
        }
        .boxed()
    }

    fn fetch_gloss(&self, _word: String, lang: LanguageCode) -> BoxFuture<'_, Vec<Meaning>> {
        async move {
            let mut script = self.script.lock().unwrap();
            script.gloss_calls += 1;
            script.glosses.get(lang.as_str()).cloned().unwrap_or_default()
        }
        .boxed()
    }
}
