use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Custom error type for TsrForge.
/// Every failure of the staged start and of the control operations ends up here.
#[derive(Debug, Error)]
pub enum TsrError {
    /// The stage marker inherited through the environment is not one we wrote.
    /// This means the environment was tampered with; retrying will not help.
    #[error("invalid stage: {0:?}")]
    InvalidStage(String),
    /// The background process did not report readiness within the start budget.
    #[error("background process did not start within {0:?}")]
    Timeout(Duration),
    /// The OS refused to create the next stage.
    #[error("failed to spawn the next stage: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    /// The path of the running executable could not be resolved.
    #[error("failed to resolve the current executable: {source}")]
    Executable {
        #[source]
        source: io::Error,
    },
    /// No PID record exists for this identity.
    #[error("not running")]
    NotRunning,
    /// A PID record exists, but the process behind it can no longer be reached.
    #[error("stale PID record: process {pid} is not reachable")]
    Stale { pid: u32 },
    /// The PID file exists but could not be parsed.
    #[error("invalid record in '{path}': {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
    /// The PID record holds PID 0.
    #[error("PID unknown")]
    NoPid,
    /// The PID record has no rendezvous address, so liveness cannot be confirmed.
    #[error("invalid PID file: missing rendezvous address")]
    NoAddress,
    /// The remote instance answered with something other than an acknowledgement.
    #[error("invalid rendezvous response: {0:?}")]
    InvalidResponse(String),
    /// Exit hooks can only be registered before `start()`.
    #[error("exit hooks must be registered before start()")]
    AlreadyStarted,
    /// (Unix) A system call failed.
    #[error("syscall '{call}' failed with errno {errno}")]
    Syscall { call: &'static str, errno: i32 },
    /// Standard IO errors (PID file, sockets, signal registration).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TsrError {
    /// True for outcomes that simply mean "nothing is running here".
    pub fn is_not_running(&self) -> bool {
        matches!(self, TsrError::NotRunning)
    }
}

/// A specialized Result type for TsrForge operations.
pub type TsrResult<T> = Result<T, TsrError>;
