use std::fmt;

/// Sink for the diagnostics the start sequence produces.
///
/// Nothing in the crate depends on what a sink does with a message; with the
/// default [`NopLogger`] everything is dropped.
pub trait Logger: Send + Sync {
    fn log(&self, args: fmt::Arguments<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _: fmt::Arguments<'_>) {}
}

/// Forwards to the `log` facade under the `tsr_forge` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Logger for LogSink {
    fn log(&self, args: fmt::Arguments<'_>) {
        log::info!(target: "tsr_forge", "{}", args);
    }
}

impl<F> Logger for F
where
    F: Fn(fmt::Arguments<'_>) + Send + Sync,
{
    fn log(&self, args: fmt::Arguments<'_>) {
        self(args)
    }
}

macro_rules! diag {
    ($logger:expr, $($arg:tt)*) => {
        {
            use $crate::logger::Logger as _;
            $logger.log(format_args!($($arg)*))
        }
    };
}

pub(crate) use diag;
