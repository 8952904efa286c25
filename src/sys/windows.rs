use std::os::windows::process::CommandExt;
use std::process::Command;
use std::sync::Arc;

use crate::error::TsrResult;
use crate::logger::{Logger, diag};
use crate::shutdown::Shutdown;

const DETACHED_PROCESS: u32 = 0x0000_0008;
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Detaches the child from our console and puts it in its own process group,
/// so Ctrl+C in the launcher's console does not reach it.
pub(crate) fn new_session(cmd: &mut Command) {
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

/// A detached process has no console to receive Ctrl+C from; termination
/// arrives through the rendezvous socket only.
pub(crate) fn listen_exit_signals(_shutdown: Arc<Shutdown>, logger: Arc<dyn Logger>) -> TsrResult<()> {
    diag!(logger, "console signals are not routed on this platform");
    Ok(())
}
