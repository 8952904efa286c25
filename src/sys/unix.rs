use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::Arc;
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::error::{TsrError, TsrResult};
use crate::logger::{Logger, diag};
use crate::shutdown::Shutdown;

/// Starts the child in a new session so it loses the controlling terminal.
pub(crate) fn new_session(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Outcome of delivering a signal to a recorded PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// `ESRCH`: nobody has that PID any more.
    NoSuchProcess,
}

/// `kill(2)`. Signal 0 only checks that the process exists. `EPERM` means it
/// exists but belongs to someone else, which still counts as delivered.
pub(crate) fn send_signal(pid: u32, signal: libc::c_int) -> TsrResult<Delivery> {
    let target = libc::pid_t::try_from(pid).map_err(|_| TsrError::Syscall {
        call: "kill",
        errno: libc::EINVAL,
    })?;
    if unsafe { libc::kill(target, signal) } == 0 {
        return Ok(Delivery::Delivered);
    }
    match io::Error::last_os_error().raw_os_error().unwrap_or(0) {
        libc::ESRCH => Ok(Delivery::NoSuchProcess),
        libc::EPERM if signal == 0 => Ok(Delivery::Delivered),
        errno => Err(TsrError::Syscall { call: "kill", errno }),
    }
}

/// Routes `SIGTERM`/`SIGINT` into the shutdown path for the lifetime of the process.
pub(crate) fn listen_exit_signals(shutdown: Arc<Shutdown>, logger: Arc<dyn Logger>) -> TsrResult<()> {
    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    thread::Builder::new()
        .name("tsr-signals".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                diag!(logger, "received signal {}, shutting down", signal);
                shutdown.trigger();
            }
        })?;
    Ok(())
}
