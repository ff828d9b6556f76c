//! Rolling window of total-CPU readings

use crate::inspector::CpuGauge;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Five minutes at a two second cadence.
pub const DEFAULT_CAPACITY: usize = 150;

pub type SharedHistory = Arc<Mutex<HistoryWindow>>;

#[derive(Debug, Clone)]
pub struct HistoryWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn shared(capacity: usize) -> SharedHistory {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub max: f64,
    pub avg: f64,
    pub samples: usize,
}

impl HistoryStats {
    pub fn from_samples(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let max = values.iter().copied().fold(f64::MIN, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            max,
            avg,
            samples: values.len(),
        })
    }
}

/// Copy the window under the lock, then compute statistics on the copy.
pub async fn stats(history: &SharedHistory) -> Option<HistoryStats> {
    let values = history.lock().await.snapshot();
    HistoryStats::from_samples(&values)
}

pub struct HistoryRecorder<G> {
    history: SharedHistory,
    gauge: G,
    interval: Duration,
}

impl<G: CpuGauge> HistoryRecorder<G> {
    pub fn new(history: SharedHistory, gauge: G, interval: Duration) -> Self {
        Self {
            history,
            gauge,
            interval,
        }
    }

    /// Take one instantaneous reading and append it.
    pub async fn record_once(&mut self) -> f64 {
        let value = self.gauge.read_now();
        self.history.lock().await.push(value);
        value
    }

    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "History recorder started");
        loop {
            let value = self.record_once().await;
            debug!(cpu = value, "Recorded total CPU");
            tokio::time::sleep(self.interval).await;
        }
    }
}
