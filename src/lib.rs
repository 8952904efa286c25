//! # TsrForge
//!
//! **TsrForge** puts a program in the background ("Terminate and Stay Resident")
//! without a service manager. The executable re-invokes itself through a few
//! stages, threading state through environment variables, and leaves a PID
//! file behind so later invocations of the same executable can check on the
//! background instance or stop it.
//!
//! ```no_run
//! use tsr_forge::Tsr;
//!
//! # fn main() -> Result<(), tsr_forge::TsrError> {
//! let mut tsr = Tsr::new().pid_file("responder.pid").build()?;
//! tsr.at_exit(|| eprintln!("bye"))?;
//! if tsr.start()? {
//!     // background: do the real work
//! } else {
//!     println!("started as PID {}", tsr.current_pid()?);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod identity;
mod logger;
pub mod pidfile;
mod process;
mod rendezvous;
mod shutdown;
mod spawn;
mod stage;
mod sys;
mod types;

// Re-export public types to keep the API flat
pub use error::{TsrError, TsrResult};
pub use identity::Identity;
pub use logger::{LogSink, Logger, NopLogger};
pub use pidfile::PidRecord;
pub use process::{DEFAULT_START_TIMEOUT, Tsr};
pub use shutdown::ExitHook;
pub use types::{Stage, Status, Transport};
