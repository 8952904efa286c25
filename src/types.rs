use std::fmt;
use std::str::FromStr;

use crate::error::TsrError;

/// Where the current process is in the re-exec sequence.
///
/// The textual form is what travels between stages in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Error sentinel. Never written to the environment.
    Unknown,
    /// The foreground process the user started.
    Initialise,
    /// (Unix) Intermediate process living in its own session.
    Detach,
    /// The background process.
    Running,
}

impl Stage {
    /// The stage the launcher hands over to.
    ///
    /// Unix needs an intermediate step so the final process is not a session
    /// leader; everywhere else the launcher starts the background process directly.
    pub fn after_initialise() -> Stage {
        if cfg!(unix) { Stage::Detach } else { Stage::Running }
    }

    /// Decodes the value of the stage variable. An absent or empty value is
    /// the cold start.
    pub fn from_marker(value: Option<&str>) -> Result<Stage, TsrError> {
        match value {
            None | Some("") => Ok(Stage::Initialise),
            Some(v) => v.parse(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Unknown => "UNKNOWN",
            Stage::Initialise => "INIT",
            Stage::Detach => "DETACH",
            Stage::Running => "RUN",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = TsrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INIT" => Ok(Stage::Initialise),
            "DETACH" if cfg!(unix) => Ok(Stage::Detach),
            "RUN" => Ok(Stage::Running),
            other => Err(TsrError::InvalidStage(other.to_owned())),
        }
    }
}

/// How the launcher, the background process and later callers talk to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// (Unix) `SIGUSR1` for the start notification, signal 0 for liveness and
    /// `SIGTERM` for termination.
    #[cfg(unix)]
    Signal,
    /// Loopback TCP with two-byte requests. Works on every platform.
    Socket,
}

impl Default for Transport {
    fn default() -> Self {
        #[cfg(unix)]
        return Transport::Signal;

        #[cfg(not(unix))]
        return Transport::Socket;
    }
}

/// What a caller can learn about the background instance from the PID record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// There is no PID record.
    NotRunning,
    /// The recorded process answered the liveness probe.
    Running { pid: u32 },
    /// The record exists but the recorded process did not answer.
    Stale { pid: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, Stage::Initialise)]
    #[case(Some(""), Stage::Initialise)]
    #[case(Some("INIT"), Stage::Initialise)]
    #[case(Some("RUN"), Stage::Running)]
    fn markers_decode(#[case] marker: Option<&str>, #[case] expected: Stage) {
        assert_eq!(Stage::from_marker(marker).unwrap(), expected);
    }

    #[rstest]
    #[case("UNKNOWN")]
    #[case("run")]
    #[case("garbage")]
    fn unknown_markers_are_rejected(#[case] marker: &str) {
        let err = Stage::from_marker(Some(marker)).unwrap_err();
        assert!(matches!(err, TsrError::InvalidStage(ref v) if v == marker));
    }

    #[test]
    fn stages_survive_the_environment() {
        let next = Stage::after_initialise();
        assert_eq!(Stage::from_marker(Some(next.to_string().as_str())).unwrap(), next);
        assert_eq!(Stage::from_marker(Some(Stage::Running.as_str())).unwrap(), Stage::Running);
    }

    #[cfg(unix)]
    #[test]
    fn unix_goes_through_detach() {
        assert_eq!(Stage::after_initialise(), Stage::Detach);
        assert_eq!(Transport::default(), Transport::Signal);
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Initialise < Stage::Detach);
        assert!(Stage::Detach < Stage::Running);
    }
}
