use crate::sinks::UsageGate;
use crate::util::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const LOG_TARGET: &str = "sinks::usage";

fn day_index(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / SECS_PER_DAY)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct DailyCounter {
    day: u64,
    used: u32,
}

/// Free-tier quota: at most `limit` translated units per UTC day.
pub struct DailyUsageGate {
    limit: u32,
    clock: Arc<dyn Clock>,
    counter: Mutex<DailyCounter>,
}

impl DailyUsageGate {
    pub fn new(limit: u32, clock: Arc<dyn Clock>) -> Self {
        let day = day_index(clock.now());
        Self {
            limit,
            clock,
            counter: Mutex::new(DailyCounter { day, used: 0 }),
        }
    }

    fn with_counter<R>(&self, f: impl FnOnce(&mut DailyCounter) -> R) -> R {
        let today = day_index(self.clock.now());
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        if counter.day != today {
            counter.day = today;
            counter.used = 0;
        }
        f(&mut counter)
    }

    pub fn used_today(&self) -> u32 {
        self.with_counter(|c| c.used)
    }

    pub fn remaining_today(&self) -> u32 {
        self.with_counter(|c| self.limit.saturating_sub(c.used))
    }
}

impl UsageGate for DailyUsageGate {
    fn can_translate(&self, unit_cost: u32) -> bool {
        self.with_counter(|c| c.used.saturating_add(unit_cost) <= self.limit)
    }

    fn increment_usage(&self, count: u32) {
        let used = self.with_counter(|c| {
            c.used = c.used.saturating_add(count);
            c.used
        });
        tracing::debug!(target: LOG_TARGET, count, used, limit = self.limit, "usage recorded");
    }
}

/// Gate for unmetered use. Still counts usage so callers can report it.
#[derive(Debug, Default)]
pub struct UnlimitedGate {
    total: AtomicU64,
}

impl UnlimitedGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl UsageGate for UnlimitedGate {
    fn can_translate(&self, _unit_cost: u32) -> bool {
        true
    }

    fn increment_usage(&self, count: u32) {
        self.total.fetch_add(u64::from(count), Ordering::Relaxed);
    }
}
