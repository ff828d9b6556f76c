use hostguard_daemon::error::GuardError;
use hostguard_daemon::inspector::{
    utilisation, CpuBaseline, CpuMeter, CpuTimes, LinuxProcessInspector, ProcessHandle, ProcessInspector,
};
use hostguard_daemon::sampler::Sampler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn own_handle(inspector: &LinuxProcessInspector) -> ProcessHandle {
    let current_pid = std::process::id();
    inspector
        .list_processes()
        .into_iter()
        .find(|p| p.pid == current_pid)
        .unwrap()
}

/// Keeps one core busy until dropped.
struct Spinner {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Spinner {
    fn start() -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            let mut x = 0u64;
            while !flag.load(Ordering::Relaxed) {
                x = std::hint::black_box(x.wrapping_add(1));
            }
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[test]
fn test_list_processes_returns_current_process() {
    let inspector = LinuxProcessInspector::new();
    let processes = inspector.list_processes();
    let current_pid = std::process::id();
    let found = processes.iter().find(|p| p.pid == current_pid);
    assert!(found.is_some(), "Current process should be in the list");
    assert!(!found.unwrap().name.is_empty());
}

#[test]
fn test_cpu_ticks_are_cumulative() {
    let inspector = LinuxProcessInspector::new();
    let handle = own_handle(&inspector);
    assert!(inspector.clock_ticks() >= 1);

    let first = inspector.cpu_ticks(&handle).unwrap();
    // Burn some CPU so the counter has something to show.
    let mut x = 0u64;
    for i in 0..20_000_000u64 {
        x = x.wrapping_add(i ^ (x >> 3));
    }
    std::hint::black_box(x);

    let second = inspector.cpu_ticks(&handle).unwrap();
    assert!(second >= first);
}

#[test]
fn test_cpu_ticks_for_invalid_pid_is_not_found() {
    let inspector = LinuxProcessInspector::new();
    let handle = ProcessHandle {
        pid: 999_999_999,
        name: "ghost".to_string(),
        start_ticks: 0,
    };
    assert_eq!(inspector.cpu_ticks(&handle), Err(GuardError::NotFound));
}

#[test]
fn test_reused_pid_is_not_found() {
    let inspector = LinuxProcessInspector::new();
    let mut handle = own_handle(&inspector);
    handle.start_ticks += 1;
    assert_eq!(inspector.cpu_ticks(&handle), Err(GuardError::NotFound));
}

#[test]
fn test_system_counters_and_memory() {
    let inspector = LinuxProcessInspector::new();
    assert!(inspector.logical_cpus() >= 1);
    let times = inspector.cpu_times().unwrap();
    assert!(times.total >= times.busy);
    let ram = inspector.memory_percent().unwrap();
    assert!((0.0..=100.0).contains(&ram));
}

#[test]
fn test_utilisation_between_readings() {
    let prev = CpuTimes { busy: 100, total: 1000 };
    assert_eq!(utilisation(prev, CpuTimes { busy: 150, total: 1100 }), 50.0);
    assert_eq!(utilisation(prev, prev), 0.0);
    // Counter reset never yields a negative value.
    assert_eq!(utilisation(prev, CpuTimes { busy: 10, total: 2000 }), 0.0);
}

#[test]
fn test_cpu_meter_stays_in_range() {
    let mut meter = CpuMeter::new(Arc::new(LinuxProcessInspector::new()));
    std::thread::sleep(std::time::Duration::from_millis(50));
    let value = meter.read();
    assert!((0.0..=100.0).contains(&value));
}

#[test]
fn test_baseline_measures_rate_between_records() {
    let handle = ProcessHandle {
        pid: 42,
        name: "worker".to_string(),
        start_ticks: 7,
    };
    let mut baseline = CpuBaseline::new();
    let t0 = Instant::now();

    assert_eq!(baseline.update(&handle, 1000, t0, 100), 0.0);
    // 150 ticks at 100 Hz over 2 s is 75% of one core.
    assert_eq!(baseline.update(&handle, 1150, t0 + Duration::from_secs(2), 100), 75.0);
    // No time elapsed, no rate.
    assert_eq!(baseline.update(&handle, 1200, t0 + Duration::from_secs(2), 100), 0.0);
}

#[test]
fn test_baseline_restarts_for_reused_pid_and_forgets_dead_ones() {
    let old = ProcessHandle {
        pid: 42,
        name: "old".to_string(),
        start_ticks: 7,
    };
    let new = ProcessHandle {
        start_ticks: 9,
        name: "new".to_string(),
        ..old.clone()
    };
    let mut baseline = CpuBaseline::new();
    let t0 = Instant::now();

    baseline.update(&old, 5000, t0, 100);
    assert_eq!(baseline.update(&new, 10, t0 + Duration::from_secs(1), 100), 0.0);

    baseline.retain_live(&[old]);
    assert!(baseline.is_empty());
}

#[test]
fn test_sample_rows_carry_start_time_from_proc() {
    let inspector = Arc::new(LinuxProcessInspector::new());
    let handle = own_handle(&inspector);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let sampler = Sampler::new(inspector);
    let snapshot = runtime.block_on(sampler.sample(usize::MAX, Duration::from_millis(50)));
    let own = snapshot.rows.iter().find(|r| r.pid == handle.pid).unwrap();
    assert_eq!(own.start_ticks, handle.start_ticks);
}

#[tokio::test]
async fn test_status_pass_inside_sample_window_keeps_rows_in_range() {
    let _spinner = Spinner::start();
    let sampler = Sampler::new(Arc::new(LinuxProcessInspector::new()));
    let own_pid = std::process::id();
    let mut status_baseline = CpuBaseline::new();

    let (snapshot, _) = tokio::join!(sampler.sample(usize::MAX, Duration::from_secs(1)), async {
        sampler.quick_snapshot(&mut status_baseline, 3);
        tokio::time::sleep(Duration::from_millis(995)).await;
        sampler.quick_snapshot(&mut status_baseline, 3)
    });

    for row in &snapshot.rows {
        assert!((0.0..=100.0).contains(&row.cpu_pct), "{:?}", row);
    }
    // The spinner runs for the whole window, so the full-window delta
    // must still show it.
    let own = snapshot.rows.iter().find(|r| r.pid == own_pid).unwrap();
    let cores = sampler.inspector().logical_cpus() as f64;
    assert!(own.cpu_pct >= 20.0 / cores, "{:?}", own);
}
