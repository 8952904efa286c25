//! Start handshake, liveness probe and termination request between instances
//! of the same program.
//!
//! Both transports honour one contract:
//! - `wait_for_start` returns within the timeout even if the child never shows up;
//! - `notify_started` never blocks on a missing waiter;
//! - `Ping` does not change anything on the remote side;
//! - `Terminate` returns once the remote side has acknowledged, while its exit
//!   hooks are still running.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TsrResult;
use crate::identity::{Handshake, Identity};
use crate::logger::Logger;
use crate::pidfile::PidRecord;
use crate::shutdown::Shutdown;
use crate::types::Transport;

#[cfg(unix)]
mod signal;
mod socket;

/// Request sent to a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Ping,
    Terminate,
}

/// Launcher side of the start handshake, armed before the child is spawned.
pub(crate) trait StartWaiter: Send {
    /// Variables the child needs to find us.
    fn env(&self) -> Vec<(String, String)>;

    /// Blocks until the background process reports it has started, or the
    /// timeout elapses.
    fn wait_for_start(self: Box<Self>, timeout: Duration) -> TsrResult<()>;
}

pub(crate) trait Rendezvous: Send + Sync {
    /// Launcher: prepare to receive the start notification.
    fn prepare(&self, identity: &Identity) -> TsrResult<Box<dyn StartWaiter>>;

    /// Background: start answering requests. Returns the address to record
    /// in the PID file, if the transport has one.
    fn listen(&self, shutdown: Arc<Shutdown>) -> TsrResult<Option<String>>;

    /// Background: tell the launcher we are up.
    fn notify_started(&self, handshake: &Handshake) -> TsrResult<()>;

    /// Any caller: `Ok(false)` means the recorded instance is unreachable.
    fn request_action(&self, record: &PidRecord, action: Action) -> TsrResult<bool>;
}

/// Builds the rendezvous for the selected transport.
pub(crate) fn channel(transport: Transport, logger: Arc<dyn Logger>) -> Box<dyn Rendezvous> {
    match transport {
        #[cfg(unix)]
        Transport::Signal => Box::new(signal::SignalRendezvous::new(logger)),
        Transport::Socket => Box::new(socket::SocketRendezvous::new(logger)),
    }
}
