use dashmap::DashMap;
use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::time::Duration;
use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use crate::error::*;

pub(crate) fn new_histogram() -> Result<Histogram<u64>> {
    Ok(Histogram::new(3)?)
}

/// Pass/fail tally for one named check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckStats {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Default)]
struct CheckCounter {
    seq: u64,
    passes: u64,
    fails: u64,
}

/// Per-VU batch of observations, merged into [`Stats`] on flush so that the
/// hot path never touches shared locks.
#[derive(Debug)]
pub(crate) struct LocalStats {
    pub requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub iterations: u64,
    pub errors: HashMap<String, u64>,
    pub checks: Vec<(&'static str, bool)>,
    pub req_duration: Histogram<u64>,
    pub iteration_duration: Histogram<u64>,
}

impl LocalStats {
    pub fn new() -> Result<Self> {
        Ok(Self {
            requests: 0,
            failed_requests: 0,
            bytes_received: 0,
            bytes_sent: 0,
            iterations: 0,
            errors: HashMap::new(),
            checks: Vec::new(),
            req_duration: new_histogram()?,
            iteration_duration: new_histogram()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requests == 0
            && self.iterations == 0
            && self.errors.is_empty()
            && self.checks.is_empty()
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        *self.errors.entry(error.into()).or_insert(0) += 1;
    }

    fn clear(&mut self) {
        self.requests = 0;
        self.failed_requests = 0;
        self.bytes_received = 0;
        self.bytes_sent = 0;
        self.iterations = 0;
        self.errors.clear();
        self.checks.clear();
        self.req_duration.reset();
        self.iteration_duration.reset();
    }
}

/// Run-wide aggregate shared by every VU.
#[derive(Debug)]
pub struct Stats {
    vus: AtomicU64,
    vus_max: AtomicU64,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    iterations: AtomicU64,
    interrupted_iterations: AtomicU64,
    errors_map: DashMap<String, u64>,
    checks: DashMap<String, CheckCounter>,
    check_seq: AtomicU64,
    req_duration: Mutex<Histogram<u64>>,
    iteration_duration: Mutex<Histogram<u64>>,
}

impl Stats {
    pub fn new() -> Result<Self> {
        Ok(Self {
            vus: AtomicU64::new(0),
            vus_max: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            interrupted_iterations: AtomicU64::new(0),
            errors_map: DashMap::new(),
            checks: DashMap::new(),
            check_seq: AtomicU64::new(0),
            req_duration: Mutex::new(new_histogram()?),
            iteration_duration: Mutex::new(new_histogram()?),
        })
    }

    pub fn vu_started(&self) {
        let now = self.vus.fetch_add(1, Ordering::Relaxed) + 1;
        self.vus_max.fetch_max(now, Ordering::Relaxed);
    }

    pub fn vu_stopped(&self) {
        self.vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_interrupted(&self) {
        self.interrupted_iterations.fetch_add(1, Ordering::Relaxed);
    }

    /// Drains `local` into the shared totals.
    pub(crate) fn merge(&self, local: &mut LocalStats) {
        if local.is_empty() {
            return;
        }

        self.total_requests
            .fetch_add(local.requests, Ordering::Release);
        self.failed_requests
            .fetch_add(local.failed_requests, Ordering::Release);
        self.bytes_received
            .fetch_add(local.bytes_received, Ordering::Relaxed);
        self.bytes_sent.fetch_add(local.bytes_sent, Ordering::Relaxed);
        self.iterations.fetch_add(local.iterations, Ordering::Relaxed);

        for (k, v) in &local.errors {
            *self.errors_map.entry(k.clone()).or_insert(0) += v;
        }

        for (name, passed) in &local.checks {
            let mut counter = self
                .checks
                .entry((*name).to_owned())
                .or_insert_with(|| CheckCounter {
                    seq: self.check_seq.fetch_add(1, Ordering::Relaxed),
                    ..Default::default()
                });
            if *passed {
                counter.passes += 1;
            } else {
                counter.fails += 1;
            }
        }

        if let Ok(mut h) = self.req_duration.lock() {
            let _ = h.add(&local.req_duration);
        }
        if let Ok(mut h) = self.iteration_duration.lock() {
            let _ = h.add(&local.iteration_duration);
        }

        local.clear();
    }

    pub fn snapshot(&self, elapsed: Duration) -> StatsSnapshot {
        let mut checks: Vec<(u64, CheckStats)> = self
            .checks
            .iter()
            .map(|r| {
                (
                    r.value().seq,
                    CheckStats {
                        name: r.key().clone(),
                        passes: r.value().passes,
                        fails: r.value().fails,
                    },
                )
            })
            .collect();
        checks.sort_by_key(|(seq, _)| *seq);

        // `merge` bumps the total before the failures, so reading failures
        // first keeps a concurrent snapshot at failed <= total
        let failed_requests = self.failed_requests.load(Ordering::Acquire);
        let total_requests = self.total_requests.load(Ordering::Acquire);

        StatsSnapshot {
            elapsed,
            vus: self.vus.load(Ordering::Relaxed),
            vus_max: self.vus_max.load(Ordering::Relaxed),
            total_requests,
            failed_requests: failed_requests.min(total_requests),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            interrupted_iterations: self.interrupted_iterations.load(Ordering::Relaxed),
            errors: self
                .errors_map
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            checks: checks.into_iter().map(|(_, c)| c).collect(),
            req_duration: self
                .req_duration
                .lock()
                .map(|h| h.clone())
                .unwrap_or_else(|e| e.into_inner().clone()),
            iteration_duration: self
                .iteration_duration
                .lock()
                .map(|h| h.clone())
                .unwrap_or_else(|e| e.into_inner().clone()),
        }
    }
}

/// Point-in-time copy of [`Stats`]. Durations in the histograms are in
/// microseconds.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub vus: u64,
    pub vus_max: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub iterations: u64,
    pub interrupted_iterations: u64,
    pub errors: HashMap<String, u64>,
    pub checks: Vec<CheckStats>,
    pub req_duration: Histogram<u64>,
    pub iteration_duration: Histogram<u64>,
}

impl StatsSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }

    pub fn check_totals(&self) -> (u64, u64) {
        self.checks
            .iter()
            .fold((0, 0), |(p, f), c| (p + c.passes, f + c.fails))
    }
}
