#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
pub(crate) use unix::{listen_exit_signals, new_session};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{listen_exit_signals, new_session};
