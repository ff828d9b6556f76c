//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hostguard_daemon::alert::{AlertPayload, AlertSink};
use hostguard_daemon::error::{GuardError, Result};
use hostguard_daemon::inspector::{CpuGauge, CpuTimes, ProcessHandle, ProcessInspector};
use hostguard_daemon::safeguard::{ProcessControl, Signal};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Clock rate reported by the fake inspector.
pub const FAKE_CLOCK_TICKS: u64 = 1000;

#[derive(Debug, Clone)]
enum Behaviour {
    /// Burns CPU at this raw rate (percent of one core) for as long as it lives.
    Steady(f64),
    /// Primes fine, gone by the second read.
    VanishAfterPrime,
    /// Access denied from the first read.
    Denied,
}

struct FakeProcess {
    pid: u32,
    name: String,
    behaviour: Behaviour,
    reads: u32,
}

/// Inspector whose counters advance with tokio's clock, so paused-time tests
/// measure exact rates.
pub struct FakeInspector {
    cores: usize,
    origin: Instant,
    processes: Mutex<Vec<FakeProcess>>,
    cpu_times: Mutex<VecDeque<CpuTimes>>,
    memory: Option<f64>,
}

impl FakeInspector {
    pub fn new(cores: usize) -> Self {
        Self {
            cores,
            origin: Instant::now(),
            processes: Mutex::new(Vec::new()),
            cpu_times: Mutex::new(VecDeque::new()),
            memory: Some(42.0),
        }
    }

    fn add(self, pid: u32, name: &str, behaviour: Behaviour) -> Self {
        self.processes.lock().unwrap().push(FakeProcess {
            pid,
            name: name.to_string(),
            behaviour,
            reads: 0,
        });
        self
    }

    pub fn process(self, pid: u32, name: &str, raw: f64) -> Self {
        self.add(pid, name, Behaviour::Steady(raw))
    }

    pub fn vanishing(self, pid: u32, name: &str) -> Self {
        self.add(pid, name, Behaviour::VanishAfterPrime)
    }

    pub fn denied(self, pid: u32, name: &str) -> Self {
        self.add(pid, name, Behaviour::Denied)
    }

    /// Queue system counter readings returned by successive `cpu_times` calls.
    pub fn cpu_times(self, times: &[(u64, u64)]) -> Self {
        self.cpu_times
            .lock()
            .unwrap()
            .extend(times.iter().map(|&(busy, total)| CpuTimes { busy, total }));
        self
    }
}

impl ProcessInspector for FakeInspector {
    fn list_processes(&self) -> Vec<ProcessHandle> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .map(|p| ProcessHandle {
                pid: p.pid,
                name: p.name.clone(),
                start_ticks: 0,
            })
            .collect()
    }

    fn cpu_ticks(&self, handle: &ProcessHandle) -> Result<u64> {
        let mut processes = self.processes.lock().unwrap();
        let process = processes
            .iter_mut()
            .find(|p| p.pid == handle.pid)
            .ok_or(GuardError::NotFound)?;
        process.reads += 1;
        match (&process.behaviour, process.reads) {
            (Behaviour::Denied, _) => Err(GuardError::PermissionDenied),
            (Behaviour::VanishAfterPrime, 1) => Ok(0),
            (Behaviour::VanishAfterPrime, _) => Err(GuardError::NotFound),
            (Behaviour::Steady(raw), _) => {
                let per_second = (raw * FAKE_CLOCK_TICKS as f64 / 100.0).round() as u128;
                let nanos = self.origin.elapsed().as_nanos();
                Ok((per_second * nanos / 1_000_000_000) as u64)
            }
        }
    }

    fn clock_ticks(&self) -> u64 {
        FAKE_CLOCK_TICKS
    }

    fn logical_cpus(&self) -> usize {
        self.cores
    }

    fn cpu_times(&self) -> Option<CpuTimes> {
        self.cpu_times.lock().unwrap().pop_front()
    }

    fn memory_percent(&self) -> Option<f64> {
        self.memory
    }
}

/// Total-CPU gauge replaying a fixed script; 0 once exhausted.
pub struct ScriptedGauge {
    readings: VecDeque<f64>,
}

impl ScriptedGauge {
    pub fn new(readings: &[f64]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl CpuGauge for ScriptedGauge {
    fn read_now(&mut self) -> f64 {
        self.readings.pop_front().unwrap_or(0.0)
    }

    async fn read_over(&mut self, window: Duration) -> f64 {
        tokio::time::sleep(window).await;
        self.read_now()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<AlertPayload>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every attempt but reports each one as failed.
    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<AlertPayload> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, payload: &AlertPayload) -> Result<()> {
        self.delivered.lock().unwrap().push(payload.clone());
        if self.fail {
            Err(GuardError::SinkUnavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeControl {
    names: HashMap<u32, String>,
    starts: HashMap<u32, u64>,
    ignores_term: HashSet<u32>,
    denied: HashSet<u32>,
    exited: Mutex<HashSet<u32>>,
    pub signals: Mutex<Vec<(u32, Signal)>>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(mut self, pid: u32, name: &str) -> Self {
        self.names.insert(pid, name.to_string());
        self
    }

    /// A process that survives SIGTERM.
    pub fn stubborn(mut self, pid: u32, name: &str) -> Self {
        self.ignores_term.insert(pid);
        self.process(pid, name)
    }

    pub fn denied(mut self, pid: u32, name: &str) -> Self {
        self.denied.insert(pid);
        self.process(pid, name)
    }

    /// The pid now belongs to a process started at `start_ticks`.
    pub fn restarted(mut self, pid: u32, name: &str, start_ticks: u64) -> Self {
        self.starts.insert(pid, start_ticks);
        self.process(pid, name)
    }

    pub fn sent(&self) -> Vec<(u32, Signal)> {
        self.signals.lock().unwrap().clone()
    }
}

impl ProcessControl for FakeControl {
    fn name_of(&self, pid: u32) -> Result<String> {
        if self.exited.lock().unwrap().contains(&pid) {
            return Err(GuardError::NotFound);
        }
        self.names.get(&pid).cloned().ok_or(GuardError::NotFound)
    }

    fn start_ticks(&self, pid: u32) -> Result<u64> {
        self.name_of(pid)?;
        Ok(self.starts.get(&pid).copied().unwrap_or(0))
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        if self.denied.contains(&pid) {
            return Err(GuardError::PermissionDenied);
        }
        self.signals.lock().unwrap().push((pid, signal));
        if signal == Signal::Kill || !self.ignores_term.contains(&pid) {
            self.exited.lock().unwrap().insert(pid);
        }
        Ok(())
    }

    fn has_exited(&self, pid: u32) -> bool {
        self.exited.lock().unwrap().contains(&pid)
    }
}
