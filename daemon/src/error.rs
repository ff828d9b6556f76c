//! Error taxonomy shared by the monitor components

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("Process no longer exists.")]
    NotFound,

    #[error("Access denied. Insufficient privilege to act on this process.")]
    PermissionDenied,

    #[error("Refusing to terminate a protected system process.")]
    Protected,

    #[error("Refusing to terminate critical process: {0}.")]
    ProtectedName(String),

    #[error("Index out of range. You have only {len} items.")]
    OutOfRange { index: usize, len: usize },

    #[error("No recent top_cpu list found (or it expired). Run top_cpu again.")]
    Expired,

    #[error("Alert sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Unexpected error: {0}")]
    Os(String),
}

impl GuardError {
    /// Map an OS error from a /proc read or a syscall onto the taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => GuardError::NotFound,
            std::io::ErrorKind::PermissionDenied => GuardError::PermissionDenied,
            _ => match err.raw_os_error() {
                Some(libc::ESRCH) => GuardError::NotFound,
                Some(libc::EPERM) | Some(libc::EACCES) => GuardError::PermissionDenied,
                _ => GuardError::Os(err.to_string()),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;
