//! The PID record: line 1 is the decimal PID, the optional line 2 is the
//! rendezvous address of the background instance.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

use crate::error::{TsrError, TsrResult};

/// What a background instance leaves behind for later invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    pub pid: u32,
    /// `None` means liveness cannot be confirmed over a socket, not that the
    /// process is dead.
    pub addr: Option<String>,
}

impl PidRecord {
    pub fn new(pid: u32, addr: Option<String>) -> Self {
        PidRecord { pid, addr }
    }

    fn render(&self) -> String {
        match &self.addr {
            Some(addr) => format!("{}\n{}\n", self.pid, addr),
            None => format!("{}\n", self.pid),
        }
    }

    fn parse(path: &Path, contents: &str) -> TsrResult<Self> {
        let mut lines = contents.lines();
        let first = lines.next().unwrap_or("").trim();
        let pid: u32 = first.parse().map_err(|_| TsrError::InvalidRecord {
            path: path.to_path_buf(),
            reason: format!("first line is not a PID: {:?}", first),
        })?;
        if pid == 0 {
            return Err(TsrError::NoPid);
        }
        let addr = lines
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned);
        Ok(PidRecord { pid, addr })
    }
}

/// Writes the record atomically: readers see either the old file or the full new one.
pub fn write(path: &Path, record: &PidRecord) -> TsrResult<()> {
    let directory = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("tsr"),
    );
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(record.render().as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Reads the record. A missing file is `NotRunning`.
pub fn read(path: &Path) -> TsrResult<PidRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(TsrError::NotRunning),
        Err(e) => return Err(TsrError::Io(e)),
    };
    PidRecord::parse(path, &contents)
}

/// Best-effort removal. Errors are swallowed.
pub fn remove(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    #[case("12345", 12345, None)]
    #[case("12345\n", 12345, None)]
    #[case("12345\ntest", 12345, Some("test"))]
    #[case("12345\n127.0.0.1:4000\n", 12345, Some("127.0.0.1:4000"))]
    #[case("  42  \n\n", 42, None)]
    fn reads_records(#[case] contents: &str, #[case] pid: u32, #[case] addr: Option<&str>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.pid");
        fs::write(&path, contents).unwrap();
        let record = read(&path).unwrap();
        assert_eq!(record.pid, pid);
        assert_eq!(record.addr.as_deref(), addr);
    }

    #[rstest]
    #[case("")]
    #[case("test")]
    #[case("-1")]
    #[case("12a45\n127.0.0.1:1")]
    fn rejects_malformed(#[case] contents: &str) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.pid");
        fs::write(&path, contents).unwrap();
        assert!(matches!(read(&path), Err(TsrError::InvalidRecord { .. })));
    }

    #[test]
    fn zero_pid_is_unknown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zero.pid");
        fs::write(&path, "0\n").unwrap();
        assert!(matches!(read(&path), Err(TsrError::NoPid)));
    }

    #[test]
    fn missing_file_is_not_running() {
        let dir = tempdir().unwrap();
        assert!(matches!(read(&dir.path().join("nope.pid")), Err(TsrError::NotRunning)));
    }

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.pid");

        let with_addr = PidRecord::new(4242, Some("127.0.0.1:5555".into()));
        write(&path, &with_addr).unwrap();
        assert_eq!(read(&path).unwrap(), with_addr);

        let bare = PidRecord::new(7, None);
        write(&path, &bare).unwrap();
        assert_eq!(read(&path).unwrap(), bare);
        assert_eq!(fs::read_to_string(&path).unwrap(), "7\n");
    }

    #[cfg(unix)]
    #[test]
    fn written_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("private.pid");
        write(&path, &PidRecord::new(1, None)).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn remove_is_best_effort() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.pid");
        remove(&path);
        write(&path, &PidRecord::new(1, None)).unwrap();
        remove(&path);
        assert!(!path.exists());
    }
}
