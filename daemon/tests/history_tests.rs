mod common;

use common::ScriptedGauge;
use hostguard_daemon::history::{self, HistoryRecorder, HistoryStats, HistoryWindow, DEFAULT_CAPACITY};
use std::time::Duration;

#[test]
fn test_window_evicts_oldest_past_capacity() {
    let mut window = HistoryWindow::new(DEFAULT_CAPACITY);
    for i in 0..151 {
        window.push(i as f64);
    }

    assert_eq!(window.len(), 150);
    let values = window.snapshot();
    assert!(!values.contains(&0.0), "first value should have been evicted");
    let expected: Vec<f64> = (1..151).map(|i| i as f64).collect();
    assert_eq!(values, expected);
}

#[test]
fn test_window_never_exceeds_capacity() {
    let mut window = HistoryWindow::new(5);
    for i in 0..1000 {
        window.push(i as f64);
        assert!(window.len() <= window.capacity());
    }
    assert_eq!(window.snapshot(), vec![995.0, 996.0, 997.0, 998.0, 999.0]);
}

#[test]
fn test_stats_over_samples() {
    let stats = HistoryStats::from_samples(&[10.0, 30.0, 20.0]).unwrap();
    assert_eq!(stats.max, 30.0);
    assert_eq!(stats.avg, 20.0);
    assert_eq!(stats.samples, 3);
    assert!(HistoryStats::from_samples(&[]).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_recorder_appends_each_reading() {
    let shared = HistoryWindow::shared(3);
    let mut recorder = HistoryRecorder::new(
        shared.clone(),
        ScriptedGauge::new(&[5.0, 15.0, 25.0, 35.0]),
        Duration::from_secs(2),
    );
    for _ in 0..4 {
        recorder.record_once().await;
    }

    assert_eq!(shared.lock().await.snapshot(), vec![15.0, 25.0, 35.0]);
    let stats = history::stats(&shared).await.unwrap();
    assert_eq!(stats.max, 35.0);
    assert_eq!(stats.avg, 25.0);
}

#[tokio::test(start_paused = true)]
async fn test_recorder_loop_runs_on_its_interval() {
    let shared = HistoryWindow::shared(150);
    let recorder = HistoryRecorder::new(
        shared.clone(),
        ScriptedGauge::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        Duration::from_secs(2),
    );
    let task = tokio::spawn(recorder.run());

    // Readings at t=0, 2, 4, 6.
    tokio::time::sleep(Duration::from_millis(6500)).await;
    task.abort();

    assert_eq!(shared.lock().await.snapshot(), vec![1.0, 2.0, 3.0, 4.0]);
}
