//! Total-CPU watchdog with hysteresis and cooldown

use crate::alert::{AlertPayload, AlertSink};
use crate::inspector::CpuGauge;
use crate::sampler::Sampler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive over-threshold readings required before an alert may fire.
pub const ALERT_AFTER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Warming,
    ReadyToAlert,
}

/// What a single reading led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Normal,
    Warming,
    /// Ready to alert but still inside the cooldown window.
    Cooldown,
    Fire,
}

#[derive(Debug, Clone)]
pub struct WatchdogState {
    threshold: f64,
    cooldown: Duration,
    consecutive_over: u32,
    last_alert: Option<Instant>,
}

impl WatchdogState {
    pub fn new(threshold: f64, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_over: 0,
            last_alert: None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.consecutive_over {
            0 => Phase::Idle,
            n if n < ALERT_AFTER => Phase::Warming,
            _ => Phase::ReadyToAlert,
        }
    }

    pub fn consecutive_over(&self) -> u32 {
        self.consecutive_over
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    /// Feed one total-CPU reading taken at `now`.
    ///
    /// A reading below the threshold clears the counter entirely. Firing
    /// leaves the counter alone, so a sustained breach fires again as soon as
    /// the cooldown lapses.
    pub fn observe(&mut self, total: f64, now: Instant) -> Verdict {
        if total < self.threshold {
            self.consecutive_over = 0;
            return Verdict::Normal;
        }
        self.consecutive_over = self.consecutive_over.saturating_add(1);
        if self.consecutive_over < ALERT_AFTER {
            return Verdict::Warming;
        }
        let cooled = match self.last_alert {
            Some(at) => now.saturating_duration_since(at) > self.cooldown,
            None => true,
        };
        if cooled {
            Verdict::Fire
        } else {
            Verdict::Cooldown
        }
    }

    pub fn record_alert(&mut self, now: Instant) {
        self.last_alert = Some(now);
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub threshold: f64,
    pub cooldown: Duration,
    /// How long each total-CPU read measures over.
    pub read_window: Duration,
    /// Idle time after each cycle.
    pub idle: Duration,
    pub top_n: usize,
    pub sample_window: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            threshold: 90.0,
            cooldown: Duration::from_secs(300),
            read_window: Duration::from_secs(1),
            idle: Duration::from_secs(4),
            top_n: 3,
            sample_window: Duration::from_secs(1),
        }
    }
}

pub struct Watchdog<G> {
    state: WatchdogState,
    settings: WatchdogSettings,
    gauge: G,
    sampler: Arc<Sampler>,
    sink: Arc<dyn AlertSink>,
    alerts_tx: Option<broadcast::Sender<AlertPayload>>,
}

impl<G: CpuGauge> Watchdog<G> {
    pub fn new(
        settings: WatchdogSettings,
        gauge: G,
        sampler: Arc<Sampler>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            state: WatchdogState::new(settings.threshold, settings.cooldown),
            settings,
            gauge,
            sampler,
            sink,
            alerts_tx: None,
        }
    }

    /// Also publish every fired alert on `tx`, e.g. to connected clients.
    pub fn with_broadcast(mut self, tx: broadcast::Sender<AlertPayload>) -> Self {
        self.alerts_tx = Some(tx);
        self
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    /// One polling cycle without the trailing idle.
    pub async fn step(&mut self) -> Verdict {
        let total = self.gauge.read_over(self.settings.read_window).await;
        let before = self.state.phase();
        let verdict = self.state.observe(total, Instant::now());
        if self.state.phase() != before {
            debug!(cpu = total, phase = ?self.state.phase(), "Watchdog phase changed");
        }

        if verdict == Verdict::Fire {
            let snapshot = self
                .sampler
                .sample(self.settings.top_n, self.settings.sample_window)
                .await;
            let payload = AlertPayload {
                total_pct: total,
                top_rows: snapshot.rows,
            };
            info!(cpu = total, threshold = self.settings.threshold, "High CPU alert");
            if let Err(e) = self.sink.deliver(&payload).await {
                warn!("Alert delivery failed: {}", e);
            }
            if let Some(tx) = &self.alerts_tx {
                let _ = tx.send(payload);
            }
            self.state.record_alert(Instant::now());
        }
        verdict
    }

    pub async fn run(mut self) {
        info!(
            threshold = self.settings.threshold,
            cooldown_secs = self.settings.cooldown.as_secs(),
            "Watchdog started"
        );
        loop {
            self.step().await;
            tokio::time::sleep(self.settings.idle).await;
        }
    }
}
