//! Batch driver: owns every unit of one search and applies attempt outcomes
//! and user commands to them one message at a time.

use crate::cache::TranslationCache;
use crate::config::{EngineConfig, LanguageCode};
use crate::orchestrator::attempt::{run_attempt, AttemptEvent, AttemptPlan, UnitMessage};
use crate::orchestrator::unit::{TranslationUnit, UnitStatus};
use crate::orchestrator::{BatchError, BatchSnapshot, UnitView};
use crate::sinks::{HistoryRecord, HistorySink, UsageGate};
use crate::translate::{Meaning, TranslationResult, Translator};
use crate::util::Clock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "orchestrator::batch";

#[derive(Debug)]
pub(crate) enum BatchCommand {
    Retry {
        index: usize,
        reply: oneshot::Sender<Result<(), BatchError>>,
    },
    CancelUnit {
        index: usize,
        reply: oneshot::Sender<Result<(), BatchError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct BatchContext<T, G, H> {
    pub translator: T,
    pub cache: Arc<TranslationCache>,
    pub gate: Arc<G>,
    pub history: Arc<H>,
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
}

pub(crate) struct BatchDriver<T, G, H> {
    id: u64,
    text: String,
    source: LanguageCode,
    units: Vec<TranslationUnit>,
    /// Index-stable: slot `i` always belongs to the `i`-th requested target.
    results: Vec<Option<TranslationResult>>,
    tokens: Vec<CancellationToken>,
    root: CancellationToken,
    ctx: BatchContext<T, G, H>,
    events: mpsc::UnboundedSender<UnitMessage>,
    snapshots: watch::Sender<BatchSnapshot>,
    complete: bool,
    cancelled: bool,
}

impl<T, G, H> BatchDriver<T, G, H>
where
    T: Translator + Clone + 'static,
    G: UsageGate + 'static,
    H: HistorySink + 'static,
{
    pub(crate) fn new(
        id: u64,
        text: String,
        source: LanguageCode,
        targets: Vec<LanguageCode>,
        root: CancellationToken,
        ctx: BatchContext<T, G, H>,
        events: mpsc::UnboundedSender<UnitMessage>,
    ) -> (Self, watch::Receiver<BatchSnapshot>) {
        let n = targets.len();
        let tokens = (0..n).map(|_| root.child_token()).collect();
        let units = targets.into_iter().map(TranslationUnit::new).collect();
        let (snapshots, rx) = watch::channel(BatchSnapshot::empty(id, &text, &source));
        let driver = Self {
            id,
            text,
            source,
            units,
            results: vec![None; n],
            tokens,
            root,
            ctx,
            events,
            snapshots,
            complete: false,
            cancelled: false,
        };
        (driver, rx)
    }

    /// Resolves cache hits and issues the provider call for every other unit.
    pub(crate) fn launch(&mut self) {
        for index in 0..self.units.len() {
            self.begin_attempt(index, 0);
        }
        self.publish();
        self.maybe_complete();
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<BatchCommand>,
        mut events: mpsc::UnboundedReceiver<UnitMessage>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => {
                    tracing::info!(target: LOG_TARGET, batch_id = self.id, "batch superseded");
                    self.cancel_all();
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(target: LOG_TARGET, batch_id = self.id, "handle dropped, stopping batch");
                        self.root.cancel();
                        break;
                    }
                },
                Some(message) = events.recv() => self.handle_event(message),
            }
        }
    }

    fn begin_attempt(&mut self, index: usize, attempt: u32) {
        let target = self.units[index].target().clone();
        if let Some(entry) = self.ctx.cache.lookup(&self.text, &self.source, &target) {
            tracing::debug!(target: LOG_TARGET, batch_id = self.id, target_lang = %target, "cache hit");
            let result = TranslationResult::success(
                self.source.clone(),
                target,
                self.text.clone(),
                entry.translation,
                entry.meanings,
                self.ctx.clock.now(),
            );
            self.apply_success(index, attempt, result, false);
            return;
        }

        let backoff = if attempt == 0 {
            std::time::Duration::ZERO
        } else {
            self.ctx.config.retry.delay_for_retry(attempt)
        };
        let plan = AttemptPlan {
            index,
            attempt,
            text: self.text.clone(),
            source: self.source.clone(),
            target,
            backoff,
            timeout: self.ctx.config.unit_timeout,
            gloss_timeout: self.ctx.config.gloss_timeout,
        };
        tokio::spawn(run_attempt(
            self.ctx.translator.clone(),
            plan,
            self.tokens[index].clone(),
            self.events.clone(),
        ));
    }

    /// Returns `true` once the batch is over and the driver should stop.
    fn handle_command(&mut self, command: BatchCommand) -> bool {
        match command {
            BatchCommand::Retry { index, reply } => {
                let _ = reply.send(self.retry(index));
                false
            }
            BatchCommand::CancelUnit { index, reply } => {
                let _ = reply.send(self.cancel_unit(index));
                false
            }
            BatchCommand::Cancel { reply } => {
                tracing::info!(target: LOG_TARGET, batch_id = self.id, "batch cancelled");
                self.root.cancel();
                self.cancel_all();
                let _ = reply.send(());
                true
            }
        }
    }

    fn retry(&mut self, index: usize) -> Result<(), BatchError> {
        let unit = self
            .units
            .get_mut(index)
            .ok_or(BatchError::UnknownUnit(index))?;
        let attempt = unit
            .begin_retry(&self.ctx.config.retry)
            .map_err(|reason| BatchError::RetryNotAllowed { index, reason })?;
        tracing::info!(
            target: LOG_TARGET,
            batch_id = self.id,
            target_lang = %unit.target(),
            retry_count = attempt,
            "retrying unit"
        );

        // A fresh token: cancelling the earlier attempt must not touch this one.
        self.tokens[index].cancel();
        self.tokens[index] = self.root.child_token();
        self.refresh_slot(index);
        self.begin_attempt(index, attempt);
        self.publish();
        Ok(())
    }

    fn cancel_unit(&mut self, index: usize) -> Result<(), BatchError> {
        let unit = self
            .units
            .get_mut(index)
            .ok_or(BatchError::UnknownUnit(index))?;
        if unit.cancel() {
            tracing::debug!(target: LOG_TARGET, batch_id = self.id, target_lang = %unit.target(), "unit cancelled");
            self.tokens[index].cancel();
            self.results[index] = None;
            self.publish();
            self.maybe_complete();
        }
        Ok(())
    }

    fn cancel_all(&mut self) {
        for (unit, token) in self.units.iter_mut().zip(&self.tokens) {
            token.cancel();
            unit.cancel();
        }
        self.results.iter_mut().for_each(|slot| *slot = None);
        self.cancelled = true;
        self.publish();
    }

    fn handle_event(&mut self, message: UnitMessage) {
        let UnitMessage {
            index,
            attempt,
            event,
        } = message;
        if index >= self.units.len() {
            return;
        }

        let applied = match event {
            AttemptEvent::TimedOut => {
                let applied = self.units[index].time_out(attempt);
                if applied {
                    tracing::info!(target: LOG_TARGET, batch_id = self.id, target_lang = %self.units[index].target(), attempt, "unit timed out");
                }
                applied
            }
            AttemptEvent::Resolved(Ok(text)) => {
                let result = TranslationResult::success(
                    self.source.clone(),
                    self.units[index].target().clone(),
                    self.text.clone(),
                    text,
                    Vec::new(),
                    self.ctx.clock.now(),
                );
                self.apply_success(index, attempt, result, true)
            }
            AttemptEvent::Resolved(Err(message)) => self.units[index].fail(attempt, message),
            AttemptEvent::Enriched(meanings) => self.apply_enrichment(index, attempt, meanings),
        };

        if !applied {
            tracing::trace!(target: LOG_TARGET, batch_id = self.id, index, attempt, "stale completion dropped");
            return;
        }
        self.refresh_slot(index);
        self.publish();
        self.maybe_complete();
    }

    fn apply_success(
        &mut self,
        index: usize,
        attempt: u32,
        result: TranslationResult,
        write_through: bool,
    ) -> bool {
        let translated = result.translated_text.clone();
        if !self.units[index].succeed(attempt, result) {
            return false;
        }
        if write_through {
            self.ctx.cache.store(
                &self.text,
                &self.source,
                self.units[index].target(),
                translated,
                Vec::new(),
            );
        }
        self.refresh_slot(index);
        if self.complete {
            // The batch total was already counted; a later retry success is billed alone.
            self.ctx.gate.increment_usage(1);
        }
        true
    }

    fn apply_enrichment(&mut self, index: usize, attempt: u32, meanings: Vec<Meaning>) -> bool {
        if !self.units[index].enrich(attempt, meanings.clone()) {
            return false;
        }
        self.ctx
            .cache
            .attach_meanings(&self.text, &self.source, self.units[index].target(), meanings);
        true
    }

    fn refresh_slot(&mut self, index: usize) {
        let unit = &self.units[index];
        self.results[index] = match unit.status() {
            UnitStatus::Success(result) => Some(result.clone()),
            UnitStatus::Error(_) => Some(TranslationResult::failed(
                self.source.clone(),
                unit.target().clone(),
                self.text.clone(),
                self.ctx.clock.now(),
            )),
            _ => None,
        };
    }

    fn maybe_complete(&mut self) {
        if self.complete || self.cancelled || !self.units.iter().all(TranslationUnit::is_settled) {
            return;
        }
        self.complete = true;

        let successes = self
            .results
            .iter()
            .flatten()
            .filter(|r| r.is_success())
            .count();
        if let Some(record) = HistoryRecord::from_results(
            &self.source,
            &self.text,
            self.results.iter().flatten(),
            self.ctx.clock.now(),
        ) {
            self.ctx.history.add_to_history(record);
        }
        self.ctx
            .gate
            .increment_usage(u32::try_from(successes).unwrap_or(u32::MAX));

        tracing::info!(
            target: LOG_TARGET,
            batch_id = self.id,
            units = self.units.len(),
            successes,
            "batch complete"
        );
        self.publish();
    }

    fn snapshot(&self) -> BatchSnapshot {
        let policy = &self.ctx.config.retry;
        BatchSnapshot {
            batch_id: self.id,
            source_text: self.text.clone(),
            source_language: self.source.clone(),
            units: self
                .units
                .iter()
                .enumerate()
                .map(|(index, unit)| UnitView::of(index, unit, policy))
                .collect(),
            results: self.results.clone(),
            complete: self.complete,
            cancelled: self.cancelled,
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}
