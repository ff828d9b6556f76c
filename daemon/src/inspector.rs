//! Process and CPU inspection capability (reads /proc on Linux)

mod linux;

pub use linux::LinuxProcessInspector;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) use linux::read_start_ticks;

/// A process as seen during enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    /// Start time in clock ticks since boot; distinguishes a reused pid.
    pub start_ticks: u64,
}

/// System-wide CPU time counters, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

pub trait ProcessInspector: Send + Sync {
    fn list_processes(&self) -> Vec<ProcessHandle>;

    /// Cumulative CPU time (user + system) consumed by the process, in clock
    /// ticks. Fails with `NotFound` once the pid belongs to a different
    /// process than `handle` describes.
    fn cpu_ticks(&self, handle: &ProcessHandle) -> Result<u64>;

    /// Clock ticks per second used by `cpu_ticks`.
    fn clock_ticks(&self) -> u64;

    fn logical_cpus(&self) -> usize;

    fn cpu_times(&self) -> Option<CpuTimes>;

    fn memory_percent(&self) -> Option<f64>;
}

struct Baseline {
    start_ticks: u64,
    ticks: u64,
    at: Instant,
}

/// Per-process CPU counters remembered by a single consumer.
///
/// The inspector itself keeps no history, so each sampling pass or status
/// source holds its own baseline and never disturbs another's window.
#[derive(Default)]
pub struct CpuBaseline {
    entries: HashMap<u32, Baseline>,
}

impl CpuBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `ticks` for `handle` read at `at`. Returns the raw CPU percent
    /// (0..=100 * logical cores) since the previous record of the same
    /// process, or 0 when there is none yet.
    pub fn update(&mut self, handle: &ProcessHandle, ticks: u64, at: Instant, clock_ticks: u64) -> f64 {
        let current = Baseline {
            start_ticks: handle.start_ticks,
            ticks,
            at,
        };
        match self.entries.insert(handle.pid, current) {
            Some(prev) if prev.start_ticks == handle.start_ticks => {
                let elapsed = at.saturating_duration_since(prev.at).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = ticks.saturating_sub(prev.ticks) as f64;
                    delta * 100.0 / (clock_ticks.max(1) as f64 * elapsed)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Forget processes that are no longer listed.
    pub fn retain_live(&mut self, live: &[ProcessHandle]) {
        self.entries.retain(|pid, entry| {
            live.iter()
                .any(|h| h.pid == *pid && h.start_ticks == entry.start_ticks)
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Total CPU utilisation between successive reads of the system counters.
///
/// Every consumer owns its own meter so that one reader never consumes the
/// delta another reader is waiting on.
pub struct CpuMeter {
    inspector: Arc<dyn ProcessInspector>,
    last: Option<CpuTimes>,
}

impl CpuMeter {
    pub fn new(inspector: Arc<dyn ProcessInspector>) -> Self {
        let last = inspector.cpu_times();
        Self { inspector, last }
    }

    /// Percent of machine capacity used since the previous call, or 0 when no
    /// interval has elapsed yet.
    pub fn read(&mut self) -> f64 {
        let Some(now) = self.inspector.cpu_times() else {
            return 0.0;
        };
        let percent = match self.last {
            Some(prev) => utilisation(prev, now),
            None => 0.0,
        };
        self.last = Some(now);
        percent
    }
}

/// Busy share of the ticks elapsed between two counter readings.
pub fn utilisation(prev: CpuTimes, now: CpuTimes) -> f64 {
    let total = now.total.saturating_sub(prev.total);
    if total == 0 {
        return 0.0;
    }
    let busy = now.busy.saturating_sub(prev.busy).min(total);
    (busy as f64 / total as f64) * 100.0
}

#[async_trait]
pub trait CpuGauge: Send {
    /// Instantaneous reading built from whatever delta accumulated since the
    /// previous read.
    fn read_now(&mut self) -> f64;

    /// Blocking-style reading: prime, suspend for `window`, read again.
    async fn read_over(&mut self, window: Duration) -> f64 {
        self.read_now();
        tokio::time::sleep(window).await;
        self.read_now()
    }
}

#[async_trait]
impl CpuGauge for CpuMeter {
    fn read_now(&mut self) -> f64 {
        self.read()
    }
}
