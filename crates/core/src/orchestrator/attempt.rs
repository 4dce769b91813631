//! One provider call for one unit, raced against the unit's timer and its
//! cancellation token. Outcomes are reported to the batch driver as messages;
//! the driver decides whether they still apply.

use crate::config::LanguageCode;
use crate::translate::{is_single_word, Meaning, Translator};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "orchestrator::attempt";

#[derive(Debug)]
pub(crate) enum AttemptEvent {
    TimedOut,
    Resolved(Result<String, String>),
    Enriched(Vec<Meaning>),
}

#[derive(Debug)]
pub(crate) struct UnitMessage {
    pub index: usize,
    pub attempt: u32,
    pub event: AttemptEvent,
}

#[derive(Clone, Debug)]
pub(crate) struct AttemptPlan {
    pub index: usize,
    pub attempt: u32,
    pub text: String,
    pub source: LanguageCode,
    pub target: LanguageCode,
    pub backoff: Duration,
    pub timeout: Duration,
    pub gloss_timeout: Duration,
}

pub(crate) async fn run_attempt<T>(
    translator: T,
    plan: AttemptPlan,
    token: CancellationToken,
    events: UnboundedSender<UnitMessage>,
) where
    T: Translator,
{
    let send = |event: AttemptEvent| {
        // The driver is gone once the batch ends; nothing left to tell.
        let _ = events.send(UnitMessage {
            index: plan.index,
            attempt: plan.attempt,
            event,
        });
    };

    if !plan.backoff.is_zero() {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(plan.backoff) => {}
        }
    }

    let mut call = translator.translate_once(
        plan.text.clone(),
        plan.source.clone(),
        plan.target.clone(),
    );
    let timer = tokio::time::sleep(plan.timeout);
    tokio::pin!(timer);

    let mut timed_out = false;
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        res = &mut call => res,
        _ = &mut timer => {
            tracing::debug!(target: LOG_TARGET, target_lang = %plan.target, attempt = plan.attempt, "attempt timed out");
            timed_out = true;
            send(AttemptEvent::TimedOut);
            // The call is left running; whatever it returns will be stale.
            tokio::select! {
                _ = token.cancelled() => return,
                res = &mut call => res,
            }
        }
    };

    let translated = match outcome {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                target: LOG_TARGET,
                target_lang = %plan.target,
                attempt = plan.attempt,
                transient = e.is_transient(),
                error = %e,
                "provider call failed"
            );
            send(AttemptEvent::Resolved(Err(e.to_string())));
            return;
        }
    };

    let glossable = !timed_out && is_single_word(&translated);
    send(AttemptEvent::Resolved(Ok(translated.clone())));

    if !glossable {
        return;
    }
    let gloss = translator.fetch_gloss(translated, plan.target.clone());
    let meanings = tokio::select! {
        _ = token.cancelled() => return,
        res = tokio::time::timeout(plan.gloss_timeout, gloss) => match res {
            Ok(meanings) => meanings,
            Err(_) => {
                tracing::debug!(target: LOG_TARGET, target_lang = %plan.target, "gloss lookup timed out");
                return;
            }
        },
    };
    if !meanings.is_empty() {
        send(AttemptEvent::Enriched(meanings));
    }
}
