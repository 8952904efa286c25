//! Namespace for the environment variables that carry state between stages.
//!
//! This module is the only place that reads or writes those variables. The
//! schema is `TSR_<identity>__<suffix>` with the suffixes `STG` (stage), `PID`
//! (launcher PID) and `ADDR` (launcher's rendezvous socket).

use std::env;
use std::path::Path;

use sha2::{Digest, Sha224};

use crate::error::TsrResult;
use crate::types::Stage;

const IDENTITY_LEN: usize = 7;

/// Short uppercase hex token derived from a PID file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Derives the identity from the PID file path. Same path, same identity.
    pub fn from_path(pid_file: &Path) -> Self {
        let digest = Sha224::digest(pid_file.to_string_lossy().as_bytes());
        let mut token = hex::encode_upper(digest);
        token.truncate(IDENTITY_LEN);
        Identity(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn var(&self, suffix: &str) -> String {
        format!("TSR_{}__{}", self.0, suffix)
    }

    pub(crate) fn stage_var(&self) -> String {
        self.var("STG")
    }

    pub(crate) fn pid_var(&self) -> String {
        self.var("PID")
    }

    pub(crate) fn addr_var(&self) -> String {
        self.var("ADDR")
    }

    /// Reads the stage this process was started in.
    pub(crate) fn current_stage(&self) -> TsrResult<Stage> {
        let value = env::var(self.stage_var()).ok();
        Stage::from_marker(value.as_deref())
    }

    /// Stage marker to hand to the next process.
    pub(crate) fn stage_marker(&self, next: Stage) -> (String, String) {
        (self.stage_var(), next.to_string())
    }

    /// PID of the launcher waiting for our start notification, if it is set and sane.
    pub(crate) fn launcher_pid(&self) -> Option<u32> {
        env::var(self.pid_var()).ok()?.trim().parse().ok()
    }

    /// Address the launcher listens on for the start notification.
    pub(crate) fn launcher_addr(&self) -> Option<String> {
        env::var(self.addr_var()).ok().filter(|v| !v.is_empty())
    }

    /// Reads what the launcher left for us, then removes the handshake
    /// variables so a later cold invocation from inside the background
    /// process starts a fresh sequence.
    pub(crate) fn take_handshake(&self) -> Handshake {
        let handshake = Handshake {
            launcher_pid: self.launcher_pid(),
            launcher_addr: self.launcher_addr(),
        };
        self.clear();
        handshake
    }

    fn clear(&self) {
        for name in [self.stage_var(), self.pid_var(), self.addr_var()] {
            // SAFETY: only reached from `start()` in the background stage,
            // before any listener thread of this crate exists. `start()`
            // documents that the caller must not touch the environment
            // concurrently.
            unsafe { env::remove_var(name) };
        }
    }
}

/// The launcher's coordinates, as handed down through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Handshake {
    pub launcher_pid: Option<u32>,
    pub launcher_addr: Option<String>,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
