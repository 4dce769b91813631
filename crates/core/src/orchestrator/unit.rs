//! Per-target translation unit.
//!
//! A unit moves `Loading -> Success | Timeout | Error`, may go back through
//! `Retrying` on a user retry, and can be cancelled from any state. Every
//! asynchronous completion carries the attempt number it belongs to and is
//! applied only if the unit is still waiting on exactly that attempt; anything
//! else is a late arrival and is dropped.

use crate::config::LanguageCode;
use crate::translate::{Meaning, TranslationResult};
use crate::util::RetryPolicy;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq)]
pub enum UnitStatus {
    Loading,
    Retrying,
    Success(TranslationResult),
    Timeout,
    Error(String),
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UnitStatusKind {
    Loading,
    Retrying,
    Success,
    Timeout,
    Error,
    Cancelled,
}

impl UnitStatus {
    pub fn kind(&self) -> UnitStatusKind {
        match self {
            UnitStatus::Loading => UnitStatusKind::Loading,
            UnitStatus::Retrying => UnitStatusKind::Retrying,
            UnitStatus::Success(_) => UnitStatusKind::Success,
            UnitStatus::Timeout => UnitStatusKind::Timeout,
            UnitStatus::Error(_) => UnitStatusKind::Error,
            UnitStatus::Cancelled => UnitStatusKind::Cancelled,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryRefusal {
    #[error("unit has not failed")]
    NotFailed,
    #[error("maximum retries reached")]
    Exhausted,
    #[error("unit was cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslationUnit {
    target: LanguageCode,
    status: UnitStatus,
    retry_count: u32,
}

impl TranslationUnit {
    pub(crate) fn new(target: LanguageCode) -> Self {
        Self {
            target,
            status: UnitStatus::Loading,
            retry_count: 0,
        }
    }

    pub fn target(&self) -> &LanguageCode {
        &self.target
    }

    pub fn status(&self) -> &UnitStatus {
        &self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The attempt currently allowed to report back.
    pub(crate) fn current_attempt(&self) -> u32 {
        self.retry_count
    }

    pub fn result(&self) -> Option<&TranslationResult> {
        match &self.status {
            UnitStatus::Success(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, UnitStatus::Loading | UnitStatus::Retrying)
    }

    /// Settled units count towards batch completion. A timed-out unit is
    /// settled even though the user may still retry it.
    pub fn is_settled(&self) -> bool {
        !self.is_in_flight()
    }

    fn is_failed(&self) -> bool {
        matches!(self.status, UnitStatus::Timeout | UnitStatus::Error(_))
    }

    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.is_failed() && policy.allows(self.retry_count)
    }

    pub fn retries_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.is_failed() && !policy.allows(self.retry_count)
    }

    fn accepts(&self, attempt: u32) -> bool {
        attempt == self.retry_count && self.is_in_flight()
    }

    /// Starts another attempt and returns its number.
    pub(crate) fn begin_retry(&mut self, policy: &RetryPolicy) -> Result<u32, RetryRefusal> {
        match self.status {
            UnitStatus::Cancelled => return Err(RetryRefusal::Cancelled),
            UnitStatus::Timeout | UnitStatus::Error(_) => {}
            _ => return Err(RetryRefusal::NotFailed),
        }
        if !policy.allows(self.retry_count) {
            return Err(RetryRefusal::Exhausted);
        }
        self.retry_count += 1;
        self.status = UnitStatus::Retrying;
        Ok(self.retry_count)
    }

    pub(crate) fn succeed(&mut self, attempt: u32, result: TranslationResult) -> bool {
        if !self.accepts(attempt) {
            return false;
        }
        self.status = UnitStatus::Success(result);
        true
    }

    pub(crate) fn fail(&mut self, attempt: u32, message: String) -> bool {
        if !self.accepts(attempt) {
            return false;
        }
        self.status = UnitStatus::Error(message);
        true
    }

    pub(crate) fn time_out(&mut self, attempt: u32) -> bool {
        if !self.accepts(attempt) {
            return false;
        }
        self.status = UnitStatus::Timeout;
        true
    }

    /// Attaches glosses to a successful result of the same attempt.
    pub(crate) fn enrich(&mut self, attempt: u32, meanings: Vec<Meaning>) -> bool {
        if attempt != self.retry_count || meanings.is_empty() {
            return false;
        }
        match &mut self.status {
            UnitStatus::Success(result) => {
                result.pronunciation = meanings.iter().find_map(|m| m.pronunciation.clone());
                result.meanings = meanings;
                true
            }
            _ => false,
        }
    }

    /// Freezes the unit. Returns `false` if it was already cancelled.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.status == UnitStatus::Cancelled {
            return false;
        }
        self.status = UnitStatus::Cancelled;
        true
    }
}
