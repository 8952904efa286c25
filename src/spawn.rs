use std::ffi::OsString;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::error::{TsrError, TsrResult};
use crate::sys;

/// Starts another copy of `image` for the next stage.
///
/// The child inherits our environment plus `env`, and its standard streams
/// are all null so it never holds the launcher's terminal open.
pub(crate) fn spawn_stage(
    image: &Path,
    args: &[OsString],
    env: &[(String, String)],
    new_session: bool,
) -> TsrResult<Child> {
    let mut cmd = Command::new(image);
    cmd.args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if new_session {
        sys::new_session(&mut cmd);
    }
    cmd.spawn().map_err(|source| TsrError::Spawn { source })
}
