use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use signal_hook::consts::signal::{SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use super::{Action, Rendezvous, StartWaiter};
use crate::error::{TsrError, TsrResult};
use crate::identity::{Handshake, Identity};
use crate::logger::{Logger, diag};
use crate::pidfile::PidRecord;
use crate::shutdown::Shutdown;
use crate::sys::unix::{Delivery, send_signal};

/// `SIGUSR1` from child to launcher once started; signal 0 probes liveness;
/// `SIGTERM` asks for termination and is handled by the exit-signal listener.
pub(crate) struct SignalRendezvous {
    logger: Arc<dyn Logger>,
}

impl SignalRendezvous {
    pub(crate) fn new(logger: Arc<dyn Logger>) -> Self {
        SignalRendezvous { logger }
    }
}

impl Rendezvous for SignalRendezvous {
    fn prepare(&self, _identity: &Identity) -> TsrResult<Box<dyn StartWaiter>> {
        // Registered before the spawn, so an early notification is not lost.
        let signals = Signals::new([SIGUSR1])?;
        Ok(Box::new(SignalWaiter { signals }))
    }

    fn listen(&self, _shutdown: Arc<Shutdown>) -> TsrResult<Option<String>> {
        Ok(None)
    }

    fn notify_started(&self, handshake: &Handshake) -> TsrResult<()> {
        let pid = handshake.launcher_pid.ok_or(TsrError::NoPid)?;
        match send_signal(pid, SIGUSR1)? {
            Delivery::Delivered => {
                diag!(self.logger, "notified launcher {}", pid);
                Ok(())
            }
            Delivery::NoSuchProcess => Err(TsrError::Stale { pid }),
        }
    }

    fn request_action(&self, record: &PidRecord, action: Action) -> TsrResult<bool> {
        let signal = match action {
            Action::Ping => 0,
            Action::Terminate => SIGTERM,
        };
        Ok(send_signal(record.pid, signal)? == Delivery::Delivered)
    }
}

struct SignalWaiter {
    signals: Signals,
}

impl StartWaiter for SignalWaiter {
    fn env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn wait_for_start(self: Box<Self>, timeout: Duration) -> TsrResult<()> {
        let mut signals = self.signals;
        let handle = signals.handle();
        let (tx, rx) = mpsc::channel();
        let waiter = thread::Builder::new()
            .name("tsr-start-wait".into())
            .spawn(move || {
                if signals.forever().next().is_some() {
                    let _ = tx.send(());
                }
            })?;

        let outcome = rx.recv_timeout(timeout);
        handle.close();
        let _ = waiter.join();
        match outcome {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                Err(TsrError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NopLogger;
    use serial_test::serial;
    use std::time::Instant;

    fn rendezvous() -> SignalRendezvous {
        SignalRendezvous::new(Arc::new(NopLogger))
    }

    #[test]
    #[serial]
    fn wait_gives_up_after_timeout() {
        let id = Identity::from_path("signal-timeout.pid".as_ref());
        let waiter = rendezvous().prepare(&id).unwrap();
        let started = Instant::now();
        let err = waiter.wait_for_start(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TsrError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn wait_returns_on_notification() {
        let id = Identity::from_path("signal-notify.pid".as_ref());
        let waiter = rendezvous().prepare(&id).unwrap();
        let me = std::process::id();
        let notifier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            send_signal(me, SIGUSR1).unwrap();
        });
        waiter.wait_for_start(Duration::from_secs(10)).unwrap();
        notifier.join().unwrap();
    }

    #[test]
    fn ping_reports_reachability() {
        let r = rendezvous();
        assert!(r.request_action(&PidRecord::new(std::process::id(), None), Action::Ping).unwrap());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!r.request_action(&PidRecord::new(pid, None), Action::Ping).unwrap());
    }
}
