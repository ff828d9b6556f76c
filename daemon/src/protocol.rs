//! IPC protocol definitions (JSON messages)

use crate::alert::AlertPayload;
use crate::history::HistoryStats;
use crate::safeguard::TerminationReport;
use crate::sampler::{ProcessSample, Snapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Status,
    WatchStatus {
        #[serde(default)]
        params: WatchStatusParams,
    },
    TopCpu {
        #[serde(default)]
        params: TopCpuParams,
    },
    Terminate { params: TerminateParams },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchStatusParams {
    pub updates: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopCpuParams {
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateParams {
    /// 1-based position in the caller's latest top_cpu result.
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Snapshot { data: Snapshot },
    Terminated { data: TerminationReport },
    Status { data: StatusData },
    Alert { data: AlertPayload },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub uptime_seconds: u64,
    pub uptime: String,
    pub cpu_percent: f64,
    pub ram_percent: Option<f64>,
    pub top: Vec<ProcessSample>,
    /// Falls back to the current reading while the window is empty.
    pub history_max: f64,
    pub history_avg: f64,
    pub history: Option<HistoryStats>,
}

/// `3d 4h 5m 6s`
pub fn format_uptime(seconds: u64) -> String {
    let (days, rest) = (seconds / 86_400, seconds % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, secs) = (rest / 60, rest % 60);
    format!("{}d {}h {}m {}s", days, hours, minutes, secs)
}
