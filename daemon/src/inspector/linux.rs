use super::{CpuTimes, ProcessHandle, ProcessInspector};
use crate::error::{GuardError, Result};
use std::fs;

/// Fields of /proc/<pid>/stat this inspector cares about.
struct StatLine {
    name: String,
    utime: u64,
    stime: u64,
    start_ticks: u64,
}

/// Stateless /proc reader. Rates are derived by callers from successive
/// counter reads, see `CpuBaseline`.
pub struct LinuxProcessInspector {
    clock_ticks: u64,
    num_cpus: usize,
}

impl LinuxProcessInspector {
    pub fn new() -> Self {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as u64;
        let num_cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) }.max(1) as usize;
        Self { clock_ticks, num_cpus }
    }
}

fn read_stat(pid: u32) -> std::io::Result<StatLine> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid))?;
    parse_stat(&content).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed stat line")
    })
}

/// Start time of `pid` in clock ticks since boot.
pub(crate) fn read_start_ticks(pid: u32) -> Result<u64> {
    read_stat(pid)
        .map(|stat| stat.start_ticks)
        .map_err(|e| GuardError::from_io(&e))
}

impl Default for LinuxProcessInspector {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a /proc/<pid>/stat line. The command name sits between the first
/// '(' and the last ')' and may itself contain spaces or parentheses.
fn parse_stat(content: &str) -> Option<StatLine> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let name = content.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    // rest[0] is field 3 (state); utime is field 14, stime 15, starttime 22.
    if rest.len() < 20 {
        return None;
    }
    Some(StatLine {
        name,
        utime: rest[11].parse().ok()?,
        stime: rest[12].parse().ok()?,
        start_ticks: rest[19].parse().ok()?,
    })
}

/// Parse the aggregate "cpu" line of /proc/stat.
fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn parse_meminfo(content: &str) -> Option<f64> {
    let field = |key: &str| -> Option<u64> {
        content
            .lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

impl ProcessInspector for LinuxProcessInspector {
    fn list_processes(&self) -> Vec<ProcessHandle> {
        let mut processes = Vec::new();
        if let Ok(entries) = fs::read_dir("/proc") {
            for entry in entries.flatten() {
                let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
                else {
                    continue;
                };
                // Vanished or unreadable entries are simply not listed.
                if let Ok(stat) = read_stat(pid) {
                    processes.push(ProcessHandle {
                        pid,
                        name: stat.name,
                        start_ticks: stat.start_ticks,
                    });
                }
            }
        }
        processes
    }

    fn cpu_ticks(&self, handle: &ProcessHandle) -> Result<u64> {
        let stat = read_stat(handle.pid).map_err(|e| GuardError::from_io(&e))?;
        if stat.start_ticks != handle.start_ticks {
            return Err(GuardError::NotFound);
        }
        Ok(stat.utime + stat.stime)
    }

    fn clock_ticks(&self) -> u64 {
        self.clock_ticks
    }

    fn logical_cpus(&self) -> usize {
        self.num_cpus
    }

    fn cpu_times(&self) -> Option<CpuTimes> {
        parse_cpu_times(&fs::read_to_string("/proc/stat").ok()?)
    }

    fn memory_percent(&self) -> Option<f64> {
        parse_meminfo(&fs::read_to_string("/proc/meminfo").ok()?)
    }
}
