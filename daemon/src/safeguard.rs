//! Protected process termination (SIGTERM, bounded wait, SIGKILL)

use crate::error::{GuardError, Result};
use crate::inspector::read_start_ticks;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// OS operations the safeguard needs.
pub trait ProcessControl: Send + Sync {
    fn name_of(&self, pid: u32) -> Result<String>;
    /// Start time of the process currently holding `pid`, in clock ticks.
    fn start_ticks(&self, pid: u32) -> Result<u64>;
    fn signal(&self, pid: u32, signal: Signal) -> Result<()>;
    /// True once the process is gone or only a zombie remains.
    fn has_exited(&self, pid: u32) -> bool;
}

pub struct LinuxProcessControl;

impl ProcessControl for LinuxProcessControl {
    fn name_of(&self, pid: u32) -> Result<String> {
        let comm = fs::read_to_string(format!("/proc/{}/comm", pid))
            .map_err(|e| GuardError::from_io(&e))?;
        Ok(comm.trim_end().to_string())
    }

    fn start_ticks(&self, pid: u32) -> Result<u64> {
        read_start_ticks(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        let pid = libc::pid_t::try_from(pid).map_err(|_| GuardError::NotFound)?;
        let rc = unsafe { libc::kill(pid, signal.raw()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(GuardError::from_io(&std::io::Error::last_os_error()))
        }
    }

    fn has_exited(&self, pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rfind(')')
                .and_then(|i| stat[i + 1..].split_whitespace().next())
                .map(|state| state == "Z" || state == "X")
                .unwrap_or(false),
            Err(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionPolicy {
    pub pids: HashSet<u32>,
    pub names: HashSet<String>,
}

impl ProtectionPolicy {
    pub fn new<P, N, S>(pids: P, names: N) -> Self
    where
        P: IntoIterator<Item = u32>,
        N: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pids: pids.into_iter().collect(),
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_protected_pid(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn is_protected_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self::new([0, 1, 2], ["systemd", "init", "kthreadd"])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub pid: u32,
    pub name: String,
    /// SIGKILL was needed after the grace period.
    pub forced: bool,
}

/// Result surfaced to callers; failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationReport {
    pub ok: bool,
    pub message: String,
}

impl From<Result<Termination>> for TerminationReport {
    fn from(result: Result<Termination>) -> Self {
        match result {
            Ok(t) => TerminationReport {
                ok: true,
                message: if t.forced {
                    format!("Killed {} (PID {}) after it ignored the termination request.", t.name, t.pid)
                } else {
                    format!("Terminated {} (PID {}).", t.name, t.pid)
                },
            },
            Err(e) => e.into(),
        }
    }
}

impl From<GuardError> for TerminationReport {
    fn from(err: GuardError) -> Self {
        TerminationReport {
            ok: false,
            message: err.to_string(),
        }
    }
}

pub struct Safeguard {
    policy: ProtectionPolicy,
    control: Arc<dyn ProcessControl>,
    wait_timeout: Duration,
}

impl Safeguard {
    pub fn new(policy: ProtectionPolicy, control: Arc<dyn ProcessControl>, wait_timeout: Duration) -> Self {
        Self {
            policy,
            control,
            wait_timeout,
        }
    }

    pub fn linux(policy: ProtectionPolicy, wait_timeout: Duration) -> Self {
        Self::new(policy, Arc::new(LinuxProcessControl), wait_timeout)
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    /// Checks run in a fixed order: protected pid, existence and access,
    /// protected name, then graceful termination with escalation.
    pub fn try_terminate(&self, pid: u32) -> Result<Termination> {
        self.try_terminate_checked(pid, None)
    }

    /// As `try_terminate`, but when `expected_start` is given the pid must
    /// still belong to the process that started at that tick. A reused pid
    /// reports `NotFound` and is never signalled.
    pub fn try_terminate_checked(&self, pid: u32, expected_start: Option<u64>) -> Result<Termination> {
        if self.policy.is_protected_pid(pid) {
            return Err(GuardError::Protected);
        }
        if let Some(expected) = expected_start {
            if self.control.start_ticks(pid)? != expected {
                return Err(GuardError::NotFound);
            }
        }
        let name = self.control.name_of(pid)?;
        if self.policy.is_protected_name(&name) {
            return Err(GuardError::ProtectedName(name));
        }

        self.control.signal(pid, Signal::Term)?;
        if self.wait_for_exit(pid) {
            return Ok(Termination { pid, name, forced: false });
        }

        warn!(pid, name = %name, "Process ignored SIGTERM, escalating to SIGKILL");
        match self.control.signal(pid, Signal::Kill) {
            // Exited between the last poll and the kill.
            Ok(()) | Err(GuardError::NotFound) => Ok(Termination { pid, name, forced: true }),
            Err(e) => Err(e),
        }
    }

    fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            if self.control.has_exited(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Blocking; call from a worker thread.
    pub fn terminate(&self, pid: u32) -> TerminationReport {
        self.terminate_checked(pid, None)
    }

    pub fn terminate_checked(&self, pid: u32, expected_start: Option<u64>) -> TerminationReport {
        let result = self.try_terminate_checked(pid, expected_start);
        match &result {
            Ok(t) => info!(pid, name = %t.name, forced = t.forced, "Process terminated"),
            Err(e) => info!(pid, "Termination refused or failed: {}", e),
        }
        result.into()
    }

    /// Runs the blocking wait on tokio's blocking pool.
    pub async fn terminate_async(self: &Arc<Self>, pid: u32, expected_start: Option<u64>) -> TerminationReport {
        let guard = Arc::clone(self);
        match tokio::task::spawn_blocking(move || guard.terminate_checked(pid, expected_start)).await {
            Ok(report) => report,
            Err(e) => GuardError::Os(e.to_string()).into(),
        }
    }
}
