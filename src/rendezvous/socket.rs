use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{Action, Rendezvous, StartWaiter};
use crate::error::{TsrError, TsrResult};
use crate::identity::{Handshake, Identity};
use crate::logger::{Logger, diag};
use crate::pidfile::PidRecord;
use crate::shutdown::Shutdown;

const LOOPBACK: &str = "127.0.0.1:0";
const ACK: &[u8; 2] = b"ok";
const EXIT: &[u8; 2] = b"ex";
const IO_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(25);

impl Action {
    fn wire(self) -> &'static [u8; 2] {
        match self {
            Action::Ping => ACK,
            Action::Terminate => EXIT,
        }
    }

    fn from_wire(bytes: &[u8; 2]) -> Option<Action> {
        match bytes {
            b"ok" => Some(Action::Ping),
            b"ex" => Some(Action::Terminate),
            _ => None,
        }
    }
}

/// Loopback TCP with two-byte messages: `ok` asks for a liveness ack, `ex`
/// asks the instance to exit. Both are answered with `ok`.
pub(crate) struct SocketRendezvous {
    logger: Arc<dyn Logger>,
}

impl SocketRendezvous {
    pub(crate) fn new(logger: Arc<dyn Logger>) -> Self {
        SocketRendezvous { logger }
    }
}

impl Rendezvous for SocketRendezvous {
    fn prepare(&self, identity: &Identity) -> TsrResult<Box<dyn StartWaiter>> {
        let listener = TcpListener::bind(LOOPBACK)?;
        let addr = listener.local_addr()?.to_string();
        diag!(self.logger, "listening on {}", addr);
        Ok(Box::new(SocketWaiter {
            listener,
            env: vec![(identity.addr_var(), addr)],
        }))
    }

    fn listen(&self, shutdown: Arc<Shutdown>) -> TsrResult<Option<String>> {
        let listener = TcpListener::bind(LOOPBACK)?;
        let addr = listener.local_addr()?.to_string();
        let logger = Arc::clone(&self.logger);
        thread::Builder::new()
            .name("tsr-rendezvous".into())
            .spawn(move || serve(listener, shutdown, logger))?;
        Ok(Some(addr))
    }

    fn notify_started(&self, handshake: &Handshake) -> TsrResult<()> {
        let addr = handshake.launcher_addr.as_deref().ok_or(TsrError::NoAddress)?;
        let mut conn = TcpStream::connect(addr)?;
        conn.set_write_timeout(Some(IO_TIMEOUT))?;
        conn.write_all(ACK)?;
        Ok(())
    }

    fn request_action(&self, record: &PidRecord, action: Action) -> TsrResult<bool> {
        let addr = record.addr.as_deref().ok_or(TsrError::NoAddress)?;
        let mut conn = match TcpStream::connect(addr) {
            Ok(c) => c,
            Err(e) => {
                diag!(self.logger, "process {} unreachable at {}: {}", record.pid, addr, e);
                return Ok(false);
            }
        };
        conn.set_read_timeout(Some(IO_TIMEOUT))?;
        conn.set_write_timeout(Some(IO_TIMEOUT))?;
        conn.write_all(action.wire())?;

        let mut reply = [0u8; 2];
        conn.read_exact(&mut reply)?;
        if &reply != ACK {
            return Err(TsrError::InvalidResponse(String::from_utf8_lossy(&reply).into_owned()));
        }
        if action == Action::Terminate {
            diag!(self.logger, "process {} acknowledged termination", record.pid);
        }
        Ok(true)
    }
}

fn serve(listener: TcpListener, shutdown: Arc<Shutdown>, logger: Arc<dyn Logger>) {
    for conn in listener.incoming() {
        let conn = match conn {
            Ok(c) => c,
            Err(e) => {
                diag!(logger, "rendezvous accept failed: {}", e);
                continue;
            }
        };
        // One thread per connection, so an idle client cannot hold up the others.
        let shutdown = Arc::clone(&shutdown);
        let conn_logger = Arc::clone(&logger);
        let spawned = thread::Builder::new()
            .name("tsr-rendezvous-conn".into())
            .spawn(move || match answer(conn) {
                Ok(Some(Action::Terminate)) => {
                    diag!(conn_logger, "termination requested");
                    shutdown.trigger();
                }
                Ok(_) => {}
                Err(e) => diag!(conn_logger, "rendezvous request failed: {}", e),
            });
        if let Err(e) = spawned {
            diag!(logger, "failed to start a rendezvous handler: {}", e);
        }
    }
}

/// Reads one request and acknowledges it. Unknown requests are dropped unanswered.
fn answer(mut conn: TcpStream) -> io::Result<Option<Action>> {
    conn.set_read_timeout(Some(IO_TIMEOUT))?;
    conn.set_write_timeout(Some(IO_TIMEOUT))?;
    let mut request = [0u8; 2];
    conn.read_exact(&mut request)?;
    let action = Action::from_wire(&request);
    if action.is_some() {
        conn.write_all(ACK)?;
        conn.flush()?;
    }
    Ok(action)
}

struct SocketWaiter {
    listener: TcpListener,
    env: Vec<(String, String)>,
}

impl StartWaiter for SocketWaiter {
    fn env(&self) -> Vec<(String, String)> {
        self.env.clone()
    }

    fn wait_for_start(self: Box<Self>, timeout: Duration) -> TsrResult<()> {
        let deadline = Instant::now() + timeout;
        self.listener.set_nonblocking(true)?;
        // Connections that have not said hello yet. None of them may block the wait.
        let mut pending: Vec<(TcpStream, Vec<u8>)> = Vec::new();
        loop {
            loop {
                match self.listener.accept() {
                    Ok((conn, _)) => {
                        conn.set_nonblocking(true)?;
                        pending.push((conn, Vec::with_capacity(ACK.len())));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(TsrError::Io(e)),
                }
            }

            let mut started = false;
            pending.retain_mut(|(conn, hello)| match poll_hello(conn, hello) {
                Hello::Received => {
                    started = true;
                    false
                }
                Hello::Pending => true,
                Hello::Rejected => false,
            });
            if started {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TsrError::Timeout(timeout));
            }
            thread::sleep(ACCEPT_POLL.min(deadline - now));
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Hello {
    Received,
    Pending,
    Rejected,
}

/// Reads whatever a non-blocking connection has to offer towards its hello.
fn poll_hello(conn: &mut TcpStream, hello: &mut Vec<u8>) -> Hello {
    let mut buf = [0u8; 2];
    while hello.len() < ACK.len() {
        match conn.read(&mut buf[..ACK.len() - hello.len()]) {
            Ok(0) => return Hello::Rejected,
            Ok(n) => hello.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Hello::Pending,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return Hello::Rejected,
        }
    }
    if hello.as_slice() == ACK {
        Hello::Received
    } else {
        Hello::Rejected
    }
}
