//! Multi-target orchestration: one search fans out to one unit per target
//! language, all running concurrently. Results are published as they arrive,
//! always in the order the targets were requested.
//!
//! A batch is driven by a single task that owns all of its units. Provider
//! calls run in their own tasks and report back by message, so every state
//! change of a unit happens in one place and in sequence. The batch is
//! complete once no unit is waiting on the provider; at that point the
//! successful results are written to history as a single record and usage is
//! charged for the successes only.

mod attempt;
mod batch;
#[cfg(test)]
mod tests;
mod unit;

use crate::cache::TranslationCache;
use crate::config::{EngineConfig, LanguageCode};
use crate::sinks::{HistorySink, UsageGate};
use crate::translate::{TranslationResult, Translator};
use crate::util::{Clock, RetryPolicy, SystemClock};
use batch::{BatchCommand, BatchContext, BatchDriver};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub use unit::{RetryRefusal, TranslationUnit, UnitStatus, UnitStatusKind};

const LOG_TARGET: &str = "orchestrator";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("text to translate is empty")]
    EmptyText,
    #[error("no target language differs from the source language")]
    NoTargets,
    #[error("translation quota exceeded ({requested} units requested)")]
    QuotaExceeded { requested: u32 },
    #[error("batch is no longer active")]
    Closed,
    #[error("no unit at index {0}")]
    UnknownUnit(usize),
    #[error("unit {index} cannot be retried: {reason}")]
    RetryNotAllowed { index: usize, reason: RetryRefusal },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitView {
    pub index: usize,
    pub target_language: LanguageCode,
    pub status: UnitStatusKind,
    pub error: Option<String>,
    pub retry_count: u32,
    pub can_retry: bool,
    /// Set once a failed unit has used up its retries.
    pub retries_exhausted: bool,
}

impl UnitView {
    fn of(index: usize, unit: &TranslationUnit, policy: &RetryPolicy) -> Self {
        let error = match unit.status() {
            UnitStatus::Error(message) => Some(message.clone()),
            _ => None,
        };
        Self {
            index,
            target_language: unit.target().clone(),
            status: unit.status().kind(),
            error,
            retry_count: unit.retry_count(),
            can_retry: unit.can_retry(policy),
            retries_exhausted: unit.retries_exhausted(policy),
        }
    }
}

/// Point-in-time view of a batch. `units[i]` and `results[i]` both belong to
/// the `i`-th requested target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchSnapshot {
    pub batch_id: u64,
    pub source_text: String,
    pub source_language: LanguageCode,
    pub units: Vec<UnitView>,
    pub results: Vec<Option<TranslationResult>>,
    pub complete: bool,
    pub cancelled: bool,
}

impl BatchSnapshot {
    fn empty(batch_id: u64, source_text: &str, source_language: &LanguageCode) -> Self {
        Self {
            batch_id,
            source_text: source_text.to_owned(),
            source_language: source_language.clone(),
            units: Vec::new(),
            results: Vec::new(),
            complete: false,
            cancelled: false,
        }
    }

    /// No unit is waiting on the provider.
    pub fn all_settled(&self) -> bool {
        self.units
            .iter()
            .all(|u| !matches!(u.status, UnitStatusKind::Loading | UnitStatusKind::Retrying))
    }

    pub fn successes(&self) -> impl Iterator<Item = &TranslationResult> {
        self.results.iter().flatten().filter(|r| r.is_success())
    }

    pub fn status_of(&self, index: usize) -> Option<UnitStatusKind> {
        self.units.get(index).map(|u| u.status)
    }
}

/// Caller's side of a running batch. The batch lives as long as its handle:
/// dropping the handle cancels whatever is still in flight.
pub struct BatchHandle {
    id: u64,
    commands: mpsc::UnboundedSender<BatchCommand>,
    snapshots: watch::Receiver<BatchSnapshot>,
}

impl BatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Waits for the next published change. `None` once the batch has stopped.
    pub async fn changed(&mut self) -> Option<BatchSnapshot> {
        self.snapshots.changed().await.ok()?;
        Some(self.snapshots.borrow_and_update().clone())
    }

    pub async fn wait_for(&mut self, predicate: impl Fn(&BatchSnapshot) -> bool) -> BatchSnapshot {
        loop {
            {
                let current = self.snapshots.borrow_and_update();
                if predicate(&*current) {
                    return (*current).clone();
                }
            }
            if self.snapshots.changed().await.is_err() {
                return self.snapshots.borrow().clone();
            }
        }
    }

    /// Resolves once every unit is settled or the batch was cancelled.
    pub async fn wait_complete(&mut self) -> BatchSnapshot {
        self.wait_for(|s| s.complete || s.cancelled).await
    }

    pub async fn retry(&self, index: usize) -> Result<(), BatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BatchCommand::Retry { index, reply })
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)?
    }

    pub async fn cancel_unit(&self, index: usize) -> Result<(), BatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BatchCommand::CancelUnit { index, reply })
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)?
    }

    pub async fn cancel(&self) -> Result<(), BatchError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BatchCommand::Cancel { reply })
            .map_err(|_| BatchError::Closed)?;
        rx.await.map_err(|_| BatchError::Closed)
    }
}

/// Drops targets equal to the source language and repeated targets, keeping
/// the first occurrence of each.
pub fn plan_targets(source: &LanguageCode, targets: &[LanguageCode]) -> Vec<LanguageCode> {
    let mut planned: Vec<LanguageCode> = Vec::with_capacity(targets.len());
    for target in targets {
        if target.same_as(source) || planned.iter().any(|p| p.same_as(target)) {
            continue;
        }
        planned.push(target.clone());
    }
    planned
}

pub struct Orchestrator<T, G, H> {
    translator: T,
    cache: Arc<TranslationCache>,
    gate: Arc<G>,
    history: Arc<H>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    active: Mutex<Option<CancellationToken>>,
}

impl<T, G, H> Orchestrator<T, G, H>
where
    T: Translator + Clone + 'static,
    G: UsageGate + 'static,
    H: HistorySink + 'static,
{
    pub fn new(
        translator: T,
        cache: Arc<TranslationCache>,
        gate: Arc<G>,
        history: Arc<H>,
        config: EngineConfig,
    ) -> Self {
        Self {
            translator,
            cache,
            gate,
            history,
            config,
            clock: Arc::new(SystemClock),
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts translating `text` into every target. Must be called from
    /// within a tokio runtime.
    ///
    /// Fails before any unit exists if the text is blank, if no target is left
    /// once the source language is filtered out, or if the usage gate refuses.
    /// Starting a batch cancels the previous one.
    pub fn start_batch(
        &self,
        text: &str,
        source: &LanguageCode,
        targets: &[LanguageCode],
    ) -> Result<BatchHandle, BatchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BatchError::EmptyText);
        }
        let targets = plan_targets(source, targets);
        if targets.is_empty() {
            return Err(BatchError::NoTargets);
        }
        let requested = u32::try_from(targets.len()).unwrap_or(u32::MAX);
        if !self.gate.can_translate(requested) {
            tracing::info!(target: LOG_TARGET, requested, "usage gate denied batch");
            return Err(BatchError::QuotaExceeded { requested });
        }

        self.cache.maybe_sweep(self.config.sweep_probability);

        let root = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = active.replace(root.clone()) {
                previous.cancel();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let target_list: Vec<&str> = targets.iter().map(LanguageCode::as_str).collect();
        tracing::info!(
            target: LOG_TARGET,
            batch_id = id,
            source_lang = %source,
            targets = ?target_list,
            "starting batch"
        );

        let ctx = BatchContext {
            translator: self.translator.clone(),
            cache: self.cache.clone(),
            gate: self.gate.clone(),
            history: self.history.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (mut driver, snapshots) = BatchDriver::new(
            id,
            text.to_owned(),
            source.clone(),
            targets,
            root,
            ctx,
            events_tx,
        );
        driver.launch();
        tokio::spawn(driver.run(commands_rx, events_rx));

        Ok(BatchHandle {
            id,
            commands: commands_tx,
            snapshots,
        })
    }

    /// Cancels the active batch, if any.
    pub fn cancel_active(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = active.take() {
            token.cancel();
        }
    }
}
