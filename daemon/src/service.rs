//! Query surface: snapshots, termination by index, host status

use crate::cache::{OwnerId, QueryCache};
use crate::config::Config;
use crate::history::{self, SharedHistory};
use crate::inspector::{CpuBaseline, CpuMeter};
use crate::protocol::{format_uptime, Request, Response, StatusData};
use crate::safeguard::{Safeguard, TerminationReport};
use crate::sampler::{Sampler, Snapshot};
use crate::socket::{ClientContext, RequestHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info};

const STATUS_TOP_N: usize = 3;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub default_top_n: usize,
    pub sample_window: Duration,
    pub status_interval: Duration,
    pub status_updates: u32,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_top_n: config.sampler.default_top_n.max(1),
            sample_window: config.sample_window(),
            status_interval: Duration::from_secs(config.status.update_interval_seconds),
            status_updates: config.status.updates,
        }
    }
}

/// Everything a status report is built from; shared with live-update tasks.
pub struct StatusSource {
    sampler: Arc<Sampler>,
    history: SharedHistory,
    meter: Mutex<CpuMeter>,
    baseline: Mutex<CpuBaseline>,
    started: Instant,
}

impl StatusSource {
    pub fn new(sampler: Arc<Sampler>, history: SharedHistory) -> Self {
        let meter = CpuMeter::new(Arc::clone(sampler.inspector()));
        Self {
            sampler,
            history,
            meter: Mutex::new(meter),
            baseline: Mutex::new(CpuBaseline::new()),
            started: Instant::now(),
        }
    }

    /// Non-blocking: uses deltas accumulated since the previous report.
    pub async fn report(&self) -> StatusData {
        let cpu_now = self.meter.lock().await.read();
        let ram = self.sampler.inspector().memory_percent();
        let top = {
            let mut baseline = self.baseline.lock().await;
            self.sampler.quick_snapshot(&mut baseline, STATUS_TOP_N).rows
        };
        let stats = history::stats(&self.history).await;
        let uptime_seconds = self.started.elapsed().as_secs();

        StatusData {
            uptime_seconds,
            uptime: format_uptime(uptime_seconds),
            cpu_percent: cpu_now,
            ram_percent: ram,
            top,
            history_max: stats.map(|s| s.max).unwrap_or(cpu_now),
            history_avg: stats.map(|s| s.avg).unwrap_or(cpu_now),
            history: stats,
        }
    }
}

pub struct HostGuard {
    sampler: Arc<Sampler>,
    safeguard: Arc<Safeguard>,
    cache: Mutex<QueryCache>,
    status: Arc<StatusSource>,
    settings: ServiceSettings,
}

impl HostGuard {
    pub fn new(
        sampler: Arc<Sampler>,
        safeguard: Arc<Safeguard>,
        cache: QueryCache,
        history: SharedHistory,
        settings: ServiceSettings,
    ) -> Self {
        let status = Arc::new(StatusSource::new(Arc::clone(&sampler), history));
        Self {
            sampler,
            safeguard,
            cache: Mutex::new(cache),
            status,
            settings,
        }
    }

    /// Take a fresh ranked snapshot and remember it for `owner`.
    pub async fn request_snapshot(&self, owner: &OwnerId, top_n: usize) -> Snapshot {
        let snapshot = self.sampler.sample(top_n.max(1), self.settings.sample_window).await;
        self.cache.lock().await.store(owner.clone(), snapshot.clone());
        debug!(owner = %owner, rows = snapshot.len(), "Stored snapshot");
        snapshot
    }

    /// Terminate the process at 1-based `index` of the owner's latest snapshot.
    pub async fn request_termination(&self, owner: &OwnerId, index: usize) -> TerminationReport {
        let target = self.cache.lock().await.select(owner, index);
        match target {
            Ok(row) => {
                info!(owner = %owner, pid = row.pid, name = %row.name, "Termination requested");
                self.safeguard.terminate_async(row.pid, Some(row.start_ticks)).await
            }
            Err(e) => e.into(),
        }
    }

    pub async fn status(&self) -> StatusData {
        self.status.report().await
    }

    /// Push `updates` status reports to `outbox`, one per interval. Stops early
    /// once the receiving client has gone away.
    pub fn watch_status(&self, outbox: mpsc::Sender<Response>, updates: u32) {
        let source = Arc::clone(&self.status);
        let interval = self.settings.status_interval;
        tokio::spawn(async move {
            for _ in 0..updates {
                tokio::time::sleep(interval).await;
                let data = source.report().await;
                if outbox.send(Response::Status { data }).await.is_err() {
                    break;
                }
            }
        });
    }

    pub async fn sweep_cache(&self) -> usize {
        self.cache.lock().await.sweep()
    }

    pub async fn run_cache_sweeper(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let evicted = self.sweep_cache().await;
            if evicted > 0 {
                debug!(evicted, "Evicted expired cached queries");
            }
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for HostGuard {
    async fn handle(&self, request: Request, client: &ClientContext) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Status => Response::Status {
                data: self.status().await,
            },

            Request::WatchStatus { params } => {
                let updates = params.updates.unwrap_or(self.settings.status_updates);
                self.watch_status(client.outbox.clone(), updates);
                Response::Status {
                    data: self.status().await,
                }
            }

            Request::TopCpu { params } => {
                let top_n = params.top_n.unwrap_or(self.settings.default_top_n);
                Response::Snapshot {
                    data: self.request_snapshot(&client.owner, top_n).await,
                }
            }

            Request::Terminate { params } => Response::Terminated {
                data: self.request_termination(&client.owner, params.index).await,
            },
        }
    }
}
