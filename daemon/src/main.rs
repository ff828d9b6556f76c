use anyhow::Result;
use hostguard_daemon::{
    alert::{AlertSink, DesktopSink, FanoutSink, WebhookSink},
    cache::QueryCache,
    config::Config,
    history::{HistoryRecorder, HistoryWindow},
    inspector::{CpuMeter, LinuxProcessInspector, ProcessInspector},
    safeguard::{ProtectionPolicy, Safeguard},
    sampler::Sampler,
    service::{HostGuard, ServiceSettings},
    socket::{handle_client, SocketServer},
    watchdog::{Watchdog, WatchdogSettings},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<Config> {
    let config_path = Config::config_path();
    let mut config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found at {:?}, using defaults", config_path);
        Config::default()
    };
    config.apply_env()?;
    Ok(config)
}

fn build_sink(config: &Config) -> Result<Arc<dyn AlertSink>> {
    let mut sinks = FanoutSink::new();
    if let Some(url) = &config.alerts.webhook_url {
        let timeout = Duration::from_secs(config.alerts.timeout_seconds);
        sinks.push(Arc::new(WebhookSink::new(url.clone(), timeout)?));
    }
    if config.alerts.desktop {
        sinks.push(Arc::new(DesktopSink::new()));
    }
    if sinks.is_empty() {
        warn!("No alert sink configured; alerts are only broadcast to connected clients");
    }
    Ok(Arc::new(sinks))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("HostGuard daemon starting...");

    let config = load_config()?;

    let inspector: Arc<dyn ProcessInspector> = Arc::new(LinuxProcessInspector::new());
    let sampler = Arc::new(Sampler::new(Arc::clone(&inspector)));
    let history = HistoryWindow::shared(config.history.capacity);
    let policy = ProtectionPolicy::new(
        config.safeguard.protected_pids.iter().copied(),
        config.safeguard.protected_names.iter().cloned(),
    );
    let safeguard = Arc::new(Safeguard::linux(policy, config.wait_timeout()));
    let sink = build_sink(&config)?;

    // Create socket server
    let socket_path = SocketServer::socket_path();
    let server = SocketServer::bind(&socket_path).await?;

    let guard = Arc::new(HostGuard::new(
        Arc::clone(&sampler),
        safeguard,
        QueryCache::new(config.cache_ttl()),
        Arc::clone(&history),
        ServiceSettings::from_config(&config),
    ));

    // Background loops run for the lifetime of the process.
    let watchdog = Watchdog::new(
        WatchdogSettings {
            threshold: config.watchdog.threshold_percent,
            cooldown: config.cooldown(),
            read_window: Duration::from_millis(config.watchdog.read_window_ms),
            idle: Duration::from_secs(config.watchdog.idle_seconds),
            top_n: config.watchdog.alert_top_n,
            sample_window: config.sample_window(),
        },
        CpuMeter::new(Arc::clone(&inspector)),
        Arc::clone(&sampler),
        sink,
    )
    .with_broadcast(server.alert_sender());
    tokio::spawn(watchdog.run());

    let recorder = HistoryRecorder::new(
        history,
        CpuMeter::new(Arc::clone(&inspector)),
        Duration::from_secs(config.history.interval_seconds),
    );
    tokio::spawn(recorder.run());

    tokio::spawn(
        Arc::clone(&guard)
            .run_cache_sweeper(Duration::from_secs(config.cache.sweep_interval_seconds.max(1))),
    );

    info!("Daemon ready, listening for connections...");

    // Accept client connections
    loop {
        match server.accept().await {
            Ok(stream) => {
                let guard = Arc::clone(&guard);
                let alerts_rx = server.alert_sender().subscribe();
                tokio::spawn(async move {
                    handle_client(stream, alerts_rx, guard).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
