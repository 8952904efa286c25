//! The re-exec state machine.
//!
//! Each process in the sequence reads its stage from the environment, does
//! the work of that stage and, unless it is the last one, starts the next
//! process with the stage advanced.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{TsrError, TsrResult};
use crate::identity::Identity;
use crate::logger::{Logger, diag};
use crate::pidfile::{self, PidRecord};
use crate::rendezvous::Rendezvous;
use crate::shutdown::{ExitHook, Shutdown};
use crate::spawn::spawn_stage;
use crate::sys;
use crate::types::Stage;

/// Everything one pass through the state machine needs.
pub(crate) struct Summon<'a> {
    pub pid_file: &'a Path,
    pub identity: &'a Identity,
    pub timeout: Duration,
    pub args: &'a [OsString],
    pub env: &'a [(String, String)],
    pub rendezvous: &'a dyn Rendezvous,
    pub logger: &'a Arc<dyn Logger>,
    pub exit_hooks: Vec<ExitHook>,
}

impl Summon<'_> {
    /// Runs the handler for the stage this process is in and reports which
    /// stage that was.
    pub(crate) fn run(self) -> TsrResult<Stage> {
        let image = env::current_exe().map_err(|source| TsrError::Executable { source })?;
        let stage = self.identity.current_stage()?;
        diag!(self.logger, "stage {} (identity {})", stage, self.identity);
        match stage {
            Stage::Initialise => self.initialise(&image).map(|()| Stage::Initialise),
            Stage::Detach => self.detach(&image),
            Stage::Running => self.running().map(|()| Stage::Running),
            Stage::Unknown => Err(TsrError::InvalidStage(Stage::Unknown.to_string())),
        }
    }

    fn next_env(&self, next: Stage, extra: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut env = self.env.to_vec();
        env.push(self.identity.stage_marker(next));
        env.extend(extra);
        env
    }

    /// The launcher: start the next stage in a new session and wait for the
    /// background process to report in.
    fn initialise(&self, image: &Path) -> TsrResult<()> {
        let waiter = self.rendezvous.prepare(self.identity)?;

        let mut extra = waiter.env();
        extra.push((self.identity.pid_var(), process::id().to_string()));
        let next = Stage::after_initialise();
        let env = self.next_env(next, extra);

        let mut child = spawn_stage(image, self.args, &env, true)?;
        diag!(self.logger, "spawned {} stage as PID {}", next, child.id());

        waiter.wait_for_start(self.timeout)?;

        if next == Stage::Detach {
            // The intermediate process exits right after spawning; reap it.
            let _ = child.wait();
        }
        match pidfile::read(self.pid_file) {
            Ok(record) => diag!(self.logger, "process started with PID: {}", record.pid),
            Err(e) => diag!(self.logger, "process started, but the PID file is unreadable: {}", e),
        }
        Ok(())
    }

    /// The intermediate process: start the background process and leave.
    /// Being a session leader, this process could reacquire a terminal; its
    /// child, not being one, never can.
    fn detach(&self, image: &Path) -> TsrResult<Stage> {
        let env = self.next_env(Stage::Running, Vec::new());
        match spawn_stage(image, self.args, &env, false) {
            Ok(child) => {
                diag!(self.logger, "spawned {} stage as PID {}", Stage::Running, child.id());
                process::exit(0);
            }
            Err(e) => {
                diag!(self.logger, "failed to spawn the background process: {}", e);
                process::exit(1);
            }
        }
    }

    /// The background process: record ourselves, arm the listeners, report in.
    fn running(self) -> TsrResult<()> {
        // Environment edits happen before any of our threads exist.
        let handshake = self.identity.take_handshake();
        let pid_file: PathBuf = self.pid_file.to_path_buf();
        let shutdown = Shutdown::new(self.exit_hooks, pid_file.clone(), Arc::clone(self.logger));

        let addr = self.rendezvous.listen(Arc::clone(&shutdown))?;
        pidfile::write(&pid_file, &PidRecord::new(process::id(), addr))?;
        if let Err(e) = sys::listen_exit_signals(shutdown, Arc::clone(self.logger)) {
            pidfile::remove(&pid_file);
            return Err(e);
        }

        if let Err(e) = self.rendezvous.notify_started(&handshake) {
            diag!(self.logger, "failed to notify the launcher: {}", e);
        }
        diag!(self.logger, "running as PID {}", process::id());
        Ok(())
    }
}
