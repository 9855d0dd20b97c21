//! Timing of analysis runs.
//!
//! The pipeline reports how long each stage and each whole run took, and
//! whether it failed. The last [`DEFAULT_MAX_SAMPLES`] durations are kept per
//! series; counts cover the process lifetime.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::types::StageKind;

pub const DEFAULT_MAX_SAMPLES: usize = 1000;

#[derive(Default)]
struct Series {
    samples: VecDeque<Duration>,
    count: u64,
    failures: u64,
}

impl Series {
    fn record(&mut self, elapsed: Duration, ok: bool, max_samples: usize) {
        if self.samples.len() == max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
        self.count += 1;
        if !ok {
            self.failures += 1;
        }
    }

    fn timings(&self) -> Option<Timings> {
        Timings::from_samples(self.samples.iter().copied())
    }
}

/// Summary of recent durations, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timings {
    pub avg_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

fn millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 100_000.0).round() / 100.0
}

impl Timings {
    fn from_samples(samples: impl Iterator<Item = Duration>) -> Option<Self> {
        let mut sorted: Vec<Duration> = samples.collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        // Nearest rank, clamped to the last sample.
        let rank = |p: usize| sorted[(sorted.len() * p / 100).min(sorted.len() - 1)];
        Some(Timings {
            avg_ms: millis(total / sorted.len() as u32),
            median_ms: millis(rank(50)),
            min_ms: millis(sorted[0]),
            max_ms: millis(sorted[sorted.len() - 1]),
            p95_ms: millis(rank(95)),
            p99_ms: millis(rank(99)),
        })
    }
}

/// One stage's share of the work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageBreakdown {
    pub stage: StageKind,
    pub count: u64,
    pub failures: u64,
    pub timings: Option<Timings>,
}

/// Everything served by the stats endpoint about analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub uptime_secs: u64,
    pub runs: u64,
    pub failed_runs: u64,
    pub error_rate_percent: f64,
    pub run_timings: Option<Timings>,
    pub stages: Vec<StageBreakdown>,
}

#[derive(Default)]
struct MonitorState {
    runs: Series,
    stages: HashMap<StageKind, Series>,
}

pub struct PerformanceMonitor {
    started: Instant,
    max_samples: usize,
    state: Mutex<MonitorState>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        PerformanceMonitor::new(DEFAULT_MAX_SAMPLES)
    }
}

impl PerformanceMonitor {
    pub fn new(max_samples: usize) -> Self {
        PerformanceMonitor {
            started: Instant::now(),
            max_samples: max_samples.max(1),
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_stage(&self, stage: StageKind, elapsed: Duration, ok: bool) {
        self.lock()
            .stages
            .entry(stage)
            .or_default()
            .record(elapsed, ok, self.max_samples);
    }

    /// A whole pipeline run. A run fails only when every stage did.
    pub fn record_run(&self, elapsed: Duration, ok: bool) {
        self.lock().runs.record(elapsed, ok, self.max_samples);
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let state = self.lock();
        let error_rate_percent = if state.runs.count == 0 {
            0.0
        } else {
            (state.runs.failures as f64 * 10_000.0 / state.runs.count as f64).round() / 100.0
        };
        let stages = StageKind::ORDER
            .into_iter()
            .filter_map(|stage| {
                let series = state.stages.get(&stage)?;
                Some(StageBreakdown {
                    stage,
                    count: series.count,
                    failures: series.failures,
                    timings: series.timings(),
                })
            })
            .collect();

        PerformanceSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            runs: state.runs.count,
            failed_runs: state.runs.failures,
            error_rate_percent,
            run_timings: state.runs.timings(),
            stages,
        }
    }
}
