//! Ranked process CPU snapshots

use crate::inspector::{utilisation, CpuBaseline, ProcessHandle, ProcessInspector};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    /// Share of total machine capacity, 0..=100.
    pub cpu_pct: f64,
    /// Start time of the measured process; pins the pid to that process.
    #[serde(default)]
    pub start_ticks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub rows: Vec<ProcessSample>,
    /// Total CPU over the same window the rows were measured in.
    pub total_cpu: f64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Convert a per-core-summed reading into a share of the whole machine,
/// clamped to 0..=100 against clock-tick rounding over short windows.
pub fn normalize_cpu(raw: f64, logical_cpus: usize) -> f64 {
    let cores = logical_cpus.max(1) as f64;
    (raw / cores).max(0.0).min(100.0)
}

fn row(handle: &ProcessHandle, raw: f64, cores: usize) -> ProcessSample {
    ProcessSample {
        pid: handle.pid,
        name: display_name(handle),
        cpu_pct: normalize_cpu(raw, cores),
        start_ticks: handle.start_ticks,
    }
}

fn display_name(handle: &ProcessHandle) -> String {
    if handle.name.is_empty() {
        format!("pid-{}", handle.pid)
    } else {
        handle.name.chars().take(MAX_NAME_LEN).collect()
    }
}

fn rank(mut rows: Vec<ProcessSample>, top_n: usize) -> Vec<ProcessSample> {
    // sort_by is stable; NaN never appears since readings are clamped.
    rows.sort_by(|a, b| b.cpu_pct.partial_cmp(&a.cpu_pct).unwrap_or(Ordering::Equal));
    rows.truncate(top_n);
    rows
}

pub struct Sampler {
    inspector: Arc<dyn ProcessInspector>,
}

impl Sampler {
    pub fn new(inspector: Arc<dyn ProcessInspector>) -> Self {
        Self { inspector }
    }

    pub fn inspector(&self) -> &Arc<dyn ProcessInspector> {
        &self.inspector
    }

    /// Prime every visible process, wait `window`, re-read and rank.
    ///
    /// The baseline lives only for this call, so concurrent samples and
    /// status reports never shorten each other's window. Processes that
    /// vanish or deny access at either read are dropped from the result
    /// rather than failing the whole snapshot.
    pub async fn sample(&self, top_n: usize, window: Duration) -> Snapshot {
        let clock_ticks = self.inspector.clock_ticks();
        let mut baseline = CpuBaseline::new();
        let cpus_before = self.inspector.cpu_times();
        let primed: Vec<ProcessHandle> = self
            .inspector
            .list_processes()
            .into_iter()
            .filter(|handle| match self.inspector.cpu_ticks(handle) {
                Ok(ticks) => {
                    baseline.update(handle, ticks, Instant::now(), clock_ticks);
                    true
                }
                Err(_) => false,
            })
            .collect();

        tokio::time::sleep(window).await;

        let cores = self.inspector.logical_cpus();
        let rows: Vec<ProcessSample> = primed
            .iter()
            .filter_map(|handle| {
                let ticks = self.inspector.cpu_ticks(handle).ok()?;
                let raw = baseline.update(handle, ticks, Instant::now(), clock_ticks);
                Some(row(handle, raw, cores))
            })
            .collect();

        let total_cpu = match (cpus_before, self.inspector.cpu_times()) {
            (Some(before), Some(after)) => utilisation(before, after),
            _ => 0.0,
        };
        debug!(primed = primed.len(), measured = rows.len(), top_n, "Sampled process CPU");

        Snapshot {
            rows: rank(rows, top_n),
            total_cpu,
        }
    }

    /// Single-pass ranking from the delta accumulated since `baseline` last
    /// saw each process. Used where waiting is not acceptable; the total is
    /// left at 0 for the caller to fill in.
    pub fn quick_snapshot(&self, baseline: &mut CpuBaseline, top_n: usize) -> Snapshot {
        let clock_ticks = self.inspector.clock_ticks();
        let cores = self.inspector.logical_cpus();
        let handles = self.inspector.list_processes();
        baseline.retain_live(&handles);
        let rows = handles
            .iter()
            .filter_map(|handle| {
                let ticks = self.inspector.cpu_ticks(handle).ok()?;
                let raw = baseline.update(handle, ticks, Instant::now(), clock_ticks);
                Some(row(handle, raw, cores))
            })
            .collect();
        Snapshot {
            rows: rank(rows, top_n),
            total_cpu: 0.0,
        }
    }
}
