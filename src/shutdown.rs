use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};

use crate::logger::{Logger, diag};
use crate::pidfile;

/// Callback run when the background instance is asked to terminate.
pub type ExitHook = Box<dyn FnOnce() + Send + 'static>;

/// The single exit path of a background instance.
///
/// The rendezvous listener and the signal listener both end up here. Whoever
/// arrives first takes the hooks; any later trigger finds nothing to do.
pub(crate) struct Shutdown {
    hooks: Mutex<Option<Vec<ExitHook>>>,
    pid_file: PathBuf,
    logger: Arc<dyn Logger>,
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("pid_file", &self.pid_file)
            .finish_non_exhaustive()
    }
}

impl Shutdown {
    pub(crate) fn new(hooks: Vec<ExitHook>, pid_file: PathBuf, logger: Arc<dyn Logger>) -> Arc<Self> {
        Arc::new(Shutdown {
            hooks: Mutex::new(Some(hooks)),
            pid_file,
            logger,
        })
    }

    /// Runs the exit hooks in registration order and removes the PID file.
    /// A panicking hook is logged and skipped. Returns `false` if another
    /// trigger got here first.
    pub(crate) fn run_once(&self) -> bool {
        let hooks = match self.hooks.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(hooks) = hooks else {
            return false;
        };
        diag!(self.logger, "running {} exit hook(s)", hooks.len());
        for (i, hook) in hooks.into_iter().enumerate() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                diag!(self.logger, "exit hook {} panicked: {}", i, panic_message(&*payload));
            }
        }
        pidfile::remove(&self.pid_file);
        true
    }

    /// Runs the exit path and terminates the process. A trigger that lost the
    /// race returns and lets the winner finish.
    pub(crate) fn trigger(&self) {
        if self.run_once() {
            diag!(self.logger, "exiting");
            process::exit(0);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string payload"
    }
}
