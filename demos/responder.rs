//! A tiny HTTP responder that puts itself in the background.
//!
//! ```text
//! cargo run --example responder            # start
//! curl localhost:6060                      # OK, PID=...
//! cargo run --example responder -- --status
//! cargo run --example responder -- --stop
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};

use clap::Parser;
use log::{error, info, warn};
use tsr_forge::{Status, Tsr, TsrError};

#[derive(Debug, Parser)]
#[command(about = "HTTP responder that runs in the background")]
struct Args {
    /// HTTP listener address
    #[arg(long, default_value = "127.0.0.1:6060")]
    addr: String,
    /// Stop the running process
    #[arg(long)]
    stop: bool,
    /// Print the process status
    #[arg(long)]
    status: bool,
    /// Custom PID file
    #[arg(long)]
    pid: Option<PathBuf>,
    /// Forward diagnostics of the start sequence to the log
    #[arg(long)]
    debug: bool,
}

/// Where the log goes. Starts on stderr and is pointed at a file once the
/// process is in the background, where stderr is gone.
#[derive(Clone)]
struct LogTarget(Arc<Mutex<Box<dyn Write + Send>>>);

impl LogTarget {
    fn stderr() -> Self {
        LogTarget(Arc::new(Mutex::new(Box::new(io::stderr()))))
    }

    fn redirect(&self, to: impl Write + Send + 'static) {
        let mut sink = self.0.lock().unwrap_or_else(|p| p.into_inner());
        let _ = sink.flush();
        *sink = Box::new(to);
    }
}

impl Write for LogTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).flush()
    }
}

fn main() {
    let target = LogTarget::stderr();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(target.clone())))
        .init();
    if let Err(e) = run(Args::parse(), &target) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args, log_target: &LogTarget) -> Result<(), Box<dyn std::error::Error>> {
    let mut tsr = Tsr::new().debug(args.debug);
    if let Some(pid) = &args.pid {
        tsr = tsr.pid_file(pid);
    }
    let mut tsr = tsr.build()?;

    if args.stop {
        return stop_process(&tsr);
    }
    if args.status {
        return print_status(&tsr);
    }
    // Refuse to start a second instance.
    if tsr.is_running().unwrap_or(false) {
        return Err("already running".into());
    }

    // All hooks must be in place before start().
    tsr.at_exit(|| info!("process is terminating"))?;

    if tsr.start()? {
        // Background: stderr is gone, so the log (exit hook included) goes to a file.
        log_target.redirect(File::create("responder.log")?);
        respond(&args.addr)?;
        tsr.close()?;
    } else {
        info!(
            "this is the launcher with PID {}; background PID is {}. See 'responder.log' for its output.",
            process::id(),
            tsr.current_pid()?
        );
        info!("Try 'curl {}' to see if it's working", args.addr);
        info!("To stop the process, run with --stop");
    }
    Ok(())
}

fn stop_process(tsr: &Tsr) -> Result<(), Box<dyn std::error::Error>> {
    match tsr.terminate() {
        Ok(()) => info!("process stopped"),
        Err(TsrError::NotRunning) => info!("process already stopped"),
        Err(TsrError::Stale { pid }) => {
            info!("process {} is gone, removing its PID file", pid);
            tsr.close()?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_status(tsr: &Tsr) -> Result<(), Box<dyn std::error::Error>> {
    match tsr.status()? {
        Status::Running { pid } => info!("process is running with PID {}", pid),
        Status::Stale { pid } => info!("process {} is not running (stale PID file)", pid),
        Status::NotRunning => info!("process is not running"),
    }
    Ok(())
}

/// Answers every request with "OK, PID=<pid>".
fn respond(addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!("serving on {} as PID {}", addr, process::id());
    for conn in listener.incoming() {
        if let Err(e) = conn.and_then(answer) {
            warn!("request failed: {}", e);
        }
    }
    Ok(())
}

fn answer(mut conn: TcpStream) -> io::Result<()> {
    // Drain the request head.
    let mut reader = BufReader::new(conn.try_clone()?);
    let mut line = String::new();
    while reader.read_line(&mut line)? > 0 {
        if line == "\r\n" || line == "\n" {
            break;
        }
        line.clear();
    }
    let body = format!("OK, PID={}\n", process::id());
    write!(
        conn,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )?;
    conn.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn redirected_log_lands_in_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("responder.log");
        let mut target = LogTarget::stderr();
        // The clone stands in for the one handed to env_logger before the redirect.
        let mut writer = target.clone();

        target.redirect(File::create(&path).unwrap());
        writer.write_all(b"process is terminating\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "process is terminating\n");
        target.flush().unwrap();
    }
}
