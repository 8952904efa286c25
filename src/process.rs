use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{TsrError, TsrResult};
use crate::identity::Identity;
use crate::logger::{LogSink, Logger, NopLogger, diag};
use crate::pidfile::{self, PidRecord};
use crate::rendezvous::{self, Action, Rendezvous};
use crate::shutdown::ExitHook;
use crate::stage::Summon;
use crate::types::{Stage, Status, Transport};

/// Default time the launcher waits for the background process to report in.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(60);

/// A program that can put itself in the background and find itself there later.
///
/// Every invocation of the executable builds the same `Tsr`; what `start()`
/// does depends on which stage of the re-exec sequence the process is in.
pub struct Tsr {
    pub(crate) pid_file: Option<PathBuf>,
    pub(crate) start_timeout: Duration,
    pub(crate) transport: Transport,

    // Environment and arguments handed to every spawned stage
    pub(crate) env_vars: HashMap<String, String>,
    pub(crate) args: Option<Vec<OsString>>,

    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) exit_hooks: Vec<ExitHook>,
    pub(crate) started: bool,
}

// Manual Debug: neither the hooks nor the logger are Debug.
impl fmt::Debug for Tsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tsr")
            .field("pid_file", &self.pid_file)
            .field("start_timeout", &self.start_timeout)
            .field("transport", &self.transport)
            .field("env_vars", &self.env_vars)
            .field("args", &self.args)
            .field("exit_hooks", &format_args!("[{} FnOnce]", self.exit_hooks.len()))
            .field("started", &self.started)
            .finish()
    }
}

impl Default for Tsr {
    fn default() -> Self {
        Self::new()
    }
}

impl Tsr {
    /// Creates a new default configuration.
    ///
    /// # Defaults
    /// - PID file: `<executable stem>.pid` in the working directory
    /// - Start timeout: 60 seconds
    /// - Transport: signals on Unix, loopback socket elsewhere
    /// - Diagnostics: dropped
    pub fn new() -> Self {
        Tsr {
            pid_file: None,
            start_timeout: DEFAULT_START_TIMEOUT,
            transport: Transport::default(),
            env_vars: HashMap::new(),
            args: None,
            logger: Arc::new(NopLogger),
            exit_hooks: Vec::new(),
            started: false,
        }
    }

    // --- Public Getters ---

    /// Returns the configured PID file path, if any.
    pub fn pid_file_path(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    pub fn start_timeout_value(&self) -> Duration {
        self.start_timeout
    }

    pub fn transport_value(&self) -> Transport {
        self.transport
    }

    /// Namespace of the environment variables used between stages.
    pub fn identity(&self) -> TsrResult<Identity> {
        Ok(Identity::from_path(&self.resolve_pid_file()?))
    }

    // --- Builder Methods ---

    /// Sets the path to the PID file. The path also determines the identity,
    /// so every invocation must use the same one.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    /// How long the launcher waits for the background process.
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Injects the diagnostics sink.
    pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// `true` forwards diagnostics to the `log` crate; `false` drops them.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.logger = if enabled { Arc::new(LogSink) } else { Arc::new(NopLogger) };
        self
    }

    /// Adds or overwrites an environment variable for the spawned stages.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env_vars.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Replaces the arguments passed to the spawned stages. By default they
    /// get the arguments of the current process.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Validates the configuration and fixes the PID file path.
    /// Fails if the PID file directory does not exist.
    pub fn build(mut self) -> TsrResult<Self> {
        let path = self.resolve_pid_file()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            return Err(TsrError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "PID file directory does not exist",
            )));
        }
        self.pid_file = Some(path);
        Ok(self)
    }

    // --- Operations ---

    /// Registers a function to run when the background instance is asked to
    /// terminate. Hooks run in registration order, exactly once, before the
    /// PID file is removed.
    pub fn at_exit<F>(&mut self, hook: F) -> TsrResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.started {
            return Err(TsrError::AlreadyStarted);
        }
        self.exit_hooks.push(Box::new(hook));
        Ok(())
    }

    /// Puts the program in the background.
    ///
    /// Returns `Ok(false)` in the launcher once the background process has
    /// reported in, and `Ok(true)` in the background process, which should go
    /// on with its real work. On Unix an intermediate process runs in between;
    /// it exits inside this call and never returns.
    ///
    /// In the background process this call removes the handshake variables
    /// from the environment, so nothing else may read or write the
    /// environment while it runs.
    pub fn start(&mut self) -> TsrResult<bool> {
        if self.started {
            return Err(TsrError::AlreadyStarted);
        }
        self.started = true;

        let pid_file = self.resolve_pid_file()?;
        let identity = Identity::from_path(&pid_file);
        let args = match &self.args {
            Some(args) => args.clone(),
            None => env::args_os().skip(1).collect(),
        };
        let env: Vec<(String, String)> = self
            .env_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let rendezvous = self.rendezvous();

        let stage = Summon {
            pid_file: &pid_file,
            identity: &identity,
            timeout: self.start_timeout,
            args: &args,
            env: &env,
            rendezvous: rendezvous.as_ref(),
            logger: &self.logger,
            exit_hooks: std::mem::take(&mut self.exit_hooks),
        }
        .run()?;
        Ok(stage == Stage::Running)
    }

    /// PID of the background instance, as recorded.
    pub fn current_pid(&self) -> TsrResult<u32> {
        Ok(pidfile::read(&self.resolve_pid_file()?)?.pid)
    }

    /// Reports whether the background instance is running, gone, or was never there.
    pub fn status(&self) -> TsrResult<Status> {
        let record = match self.record()? {
            Some(r) => r,
            None => return Ok(Status::NotRunning),
        };
        let alive = self.rendezvous().request_action(&record, Action::Ping)?;
        Ok(if alive {
            Status::Running { pid: record.pid }
        } else {
            Status::Stale { pid: record.pid }
        })
    }

    /// `Ok(false)` when there is no PID record or it is stale.
    pub fn is_running(&self) -> TsrResult<bool> {
        Ok(matches!(self.status()?, Status::Running { .. }))
    }

    /// Asks the background instance to exit. Returns once it has
    /// acknowledged; it may still be running its exit hooks.
    pub fn terminate(&self) -> TsrResult<()> {
        let record = self.record()?.ok_or(TsrError::NotRunning)?;
        if self.rendezvous().request_action(&record, Action::Terminate)? {
            diag!(self.logger, "process {} terminated", record.pid);
            Ok(())
        } else {
            Err(TsrError::Stale { pid: record.pid })
        }
    }

    /// Removes the PID file. Meant for the background instance's own shutdown.
    pub fn close(&self) -> TsrResult<()> {
        pidfile::remove(&self.resolve_pid_file()?);
        Ok(())
    }

    // --- Internals ---

    fn record(&self) -> TsrResult<Option<PidRecord>> {
        match pidfile::read(&self.resolve_pid_file()?) {
            Ok(r) => Ok(Some(r)),
            Err(TsrError::NotRunning) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn rendezvous(&self) -> Box<dyn Rendezvous> {
        rendezvous::channel(self.transport, Arc::clone(&self.logger))
    }

    fn resolve_pid_file(&self) -> TsrResult<PathBuf> {
        if let Some(path) = &self.pid_file {
            return Ok(path.clone());
        }
        let exe = env::current_exe().map_err(|source| TsrError::Executable { source })?;
        Ok(pid_file_from_exe(&exe))
    }
}

/// `/usr/local/bin/proggy` and `proggy.exe` both become `proggy.pid`.
pub(crate) fn pid_file_from_exe(executable: &Path) -> PathBuf {
    let stem = executable
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("tsr"));
    let mut name = stem;
    name.push(".pid");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[rstest]
    #[case("./test", "test.pid")]
    #[case("test.exe", "test.pid")]
    #[case("/usr/local/bin/proggy", "proggy.pid")]
    #[case("/opt/app/responder.bin", "responder.pid")]
    fn pid_file_names(#[case] exe: &str, #[case] expected: &str) {
        assert_eq!(pid_file_from_exe(Path::new(exe)), PathBuf::from(expected));
    }

    #[test]
    fn defaults() {
        let tsr = Tsr::new();
        assert_eq!(tsr.start_timeout_value(), Duration::from_secs(60));
        assert_eq!(tsr.transport_value(), Transport::default());
        assert!(tsr.pid_file_path().is_none());

        let built = tsr.build().unwrap();
        let path = built.pid_file_path().unwrap();
        assert_eq!(path.extension().unwrap(), "pid");
    }

    #[test]
    fn build_rejects_missing_directory() {
        let dir = tempdir().unwrap();
        let result = Tsr::new().pid_file(dir.path().join("missing/app.pid")).build();
        assert!(matches!(result, Err(TsrError::Io(_))));
    }

    #[test]
    fn identity_follows_pid_file() {
        let tsr = Tsr::new().pid_file("test.pid");
        assert_eq!(tsr.identity().unwrap().as_str(), "EF61F1A");
    }

    #[test]
    fn nothing_recorded() {
        let dir = tempdir().unwrap();
        let tsr = Tsr::new().pid_file(dir.path().join("none.pid")).build().unwrap();
        assert_eq!(tsr.status().unwrap(), Status::NotRunning);
        assert!(!tsr.is_running().unwrap());
        assert!(matches!(tsr.terminate(), Err(TsrError::NotRunning)));
        assert!(matches!(tsr.current_pid(), Err(TsrError::NotRunning)));
    }

    #[test]
    fn malformed_record_is_surfaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.pid");
        fs::write(&path, "not-a-pid\n").unwrap();
        let tsr = Tsr::new().pid_file(&path);
        assert!(matches!(tsr.is_running(), Err(TsrError::InvalidRecord { .. })));
        assert!(matches!(tsr.terminate(), Err(TsrError::InvalidRecord { .. })));
    }

    #[test]
    fn stale_socket_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().to_string()
        };
        pidfile::write(&path, &PidRecord::new(31337, Some(addr))).unwrap();

        let tsr = Tsr::new().pid_file(&path).transport(Transport::Socket);
        assert_eq!(tsr.current_pid().unwrap(), 31337);
        assert_eq!(tsr.status().unwrap(), Status::Stale { pid: 31337 });
        assert!(!tsr.is_running().unwrap());
        assert!(matches!(tsr.terminate(), Err(TsrError::Stale { pid: 31337 })));
        assert!(path.exists());

        tsr.close().unwrap();
        assert!(!path.exists());
        assert_eq!(tsr.status().unwrap(), Status::NotRunning);
    }

    #[test]
    fn socket_record_without_address() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noaddr.pid");
        pidfile::write(&path, &PidRecord::new(12, None)).unwrap();
        let tsr = Tsr::new().pid_file(&path).transport(Transport::Socket);
        assert!(matches!(tsr.is_running(), Err(TsrError::NoAddress)));
    }

    #[cfg(unix)]
    #[test]
    fn signal_record_of_ourselves_is_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("self.pid");
        pidfile::write(&path, &PidRecord::new(std::process::id(), None)).unwrap();
        let tsr = Tsr::new().pid_file(&path).transport(Transport::Signal);
        assert_eq!(tsr.status().unwrap(), Status::Running { pid: std::process::id() });
    }

    #[test]
    fn hooks_are_rejected_after_start() {
        let mut tsr = Tsr::new();
        tsr.at_exit(|| {}).unwrap();
        tsr.started = true;
        assert!(matches!(tsr.at_exit(|| {}), Err(TsrError::AlreadyStarted)));
        assert!(matches!(tsr.start(), Err(TsrError::AlreadyStarted)));
    }

    #[test]
    fn debug_hides_hooks() {
        let mut tsr = Tsr::new().pid_file("dbg.pid").env("A", "b");
        tsr.at_exit(|| {}).unwrap();
        let rendered = format!("{:?}", tsr);
        assert!(rendered.contains("[1 FnOnce]"));
        assert!(rendered.contains("dbg.pid"));
    }
}
