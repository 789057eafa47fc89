//! natter process supervisor
//!
//! Owns the child process and its output stream.
//!
//! ## States
//!
//! ```text
//!            start()                 output closes / restart flag
//! Stopped ──────────► Running ──────────────────────────────────► Exited
//!    ▲                   │ stop(): SIGTERM, 5s grace, SIGKILL        │
//!    └───────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! stdout and stderr share one pipe, so lines arrive in the order natter
//! wrote them. A reader thread splits the pipe into lines of at most
//! [`MAX_LINE_BYTES`] and forwards them to the monitor.
//!
//! The child handle sits behind a mutex shared with [`ChildHandle`], so the
//! IP watcher can signal the current child but never one that `stop()` or
//! `start()` is in the middle of replacing.

use crate::config::{NatterConfig, Timings};
use crate::control::Control;
use crate::endpoint::{Endpoint, parse_line};
use crate::error::{Error, Result};
use crate::traits::EndpointSink;

use std::fmt;
use std::io::{self, BufRead};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Longest output line kept; the rest of an over-long line is dropped
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Lines buffered between the reader thread and the monitor
const OUTPUT_BUFFER_LINES: usize = 64;

/// Combined stdout/stderr of the child, one item per line
type OutputStream = ReceiverStream<io::Result<Vec<u8>>>;

/// Program and arguments used to launch natter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ChildCommand {
    /// `<interpreter> <script> -p <port> <args...>`
    pub fn from_config(config: &NatterConfig) -> Self {
        let mut args = vec![
            config.script.to_string_lossy().into_owned(),
            "-p".to_string(),
            config.port.to_string(),
        ];
        args.extend(config.args.iter().cloned());

        Self {
            program: config.interpreter.clone(),
            args,
        }
    }
}

impl fmt::Display for ChildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a monitoring pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The restart flag was set; not an abnormal exit
    RestartRequested,
    /// Shutdown was requested while reading
    Shutdown,
    /// The output closed without a restart request
    Exited {
        /// Exit status, if the child could be reaped
        status: Option<ExitStatus>,
    },
}

/// Shared access to the current child, for signalling only
#[derive(Debug, Clone)]
pub struct ChildHandle {
    child: Arc<Mutex<Option<Child>>>,
}

impl ChildHandle {
    /// Send the graceful terminate signal to the current child, if any
    ///
    /// Returns `true` if a child was signalled.
    pub async fn terminate(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => match send_terminate(child) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to signal natter: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// PID of the current child, if it is running
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }
}

/// natter process supervisor
pub struct Supervisor {
    /// Command line of the child
    command: ChildCommand,

    /// The child, shared with [`ChildHandle`]
    child: Arc<Mutex<Option<Child>>>,

    /// Output of the current child; `None` while stopped
    output: Option<OutputStream>,

    /// Last endpoint seen from the current child
    current: Option<Endpoint>,

    /// Shared run/restart flags
    control: Control,

    /// Grace period between SIGTERM and SIGKILL
    stop_grace: Duration,

    /// Pause between stop and start in `restart()`
    restart_pause: Duration,
}

impl Supervisor {
    pub fn new(config: &NatterConfig, control: Control, timings: &Timings) -> Self {
        Self::with_command(ChildCommand::from_config(config), control, timings)
    }

    /// Supervise an arbitrary command
    pub fn with_command(command: ChildCommand, control: Control, timings: &Timings) -> Self {
        Self {
            command,
            child: Arc::new(Mutex::new(None)),
            output: None,
            current: None,
            control,
            stop_grace: timings.stop_grace,
            restart_pause: timings.restart_pause,
        }
    }

    /// Handle for signalling the child from other tasks
    pub fn handle(&self) -> ChildHandle {
        ChildHandle {
            child: Arc::clone(&self.child),
        }
    }

    /// The command line used for the child
    pub fn command(&self) -> &ChildCommand {
        &self.command
    }

    /// Whether a child has been started and its output not yet consumed to the end
    pub fn is_started(&self) -> bool {
        self.output.is_some()
    }

    /// Last endpoint observed from the current child
    pub fn current_endpoint(&self) -> Option<Endpoint> {
        self.current
    }

    /// Spawn the child
    ///
    /// # Returns
    ///
    /// - `Ok(pid)`: the child is running and its output is being captured
    /// - `Err(Error)`: spawning failed; the supervisor stays stopped
    pub async fn start(&mut self) -> Result<u32> {
        info!("Starting natter: {}", self.command);

        let (reader, writer) = os_pipe::pipe()
            .map_err(|e| Error::process(format!("failed to create output pipe: {}", e)))?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| Error::process(format!("failed to share output pipe: {}", e)))?;

        // The Command owns the parent's write ends and drops them right after
        // spawning, so the reader sees EOF once the child side closes.
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(std::process::Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process(format!("failed to start {}: {}", self.command, e)))?;

        let pid = child.id().unwrap_or_default();
        let output = spawn_output_reader(reader)?;

        *self.child.lock().await = Some(child);
        self.output = Some(output);

        info!("natter started (pid {})", pid);
        Ok(pid)
    }

    /// Read the child's output until it closes, a restart is requested, or shutdown
    ///
    /// Every non-empty line is logged verbatim under the `natter` target and
    /// parsed; each new endpoint is passed to `sink` before the next line is read.
    pub async fn monitor(&mut self, sink: &mut dyn EndpointSink) -> MonitorOutcome {
        let Some(mut output) = self.output.take() else {
            warn!("monitor() called without a running natter");
            return MonitorOutcome::Exited { status: None };
        };

        info!("Monitoring natter output");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.control.stopped() => return MonitorOutcome::Shutdown,
                next = output.next() => next,
            };

            let Some(next) = next else {
                break;
            };

            if self.control.restart_requested() {
                warn!("Restart requested, leaving the output loop");
                break;
            }

            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read natter output: {}", e);
                    break;
                }
            };

            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            info!(target: "natter", "{}", line);

            if let Some(endpoint) = parse_line(line)
                && self.current != Some(endpoint)
            {
                info!("New mapping detected: {}", endpoint);
                self.current = Some(endpoint);
                sink.endpoint_changed(endpoint).await;
            }
        }

        if self.control.restart_requested() {
            return MonitorOutcome::RestartRequested;
        }

        MonitorOutcome::Exited {
            status: self.reap().await,
        }
    }

    /// Wait briefly for the child to exit after its output closed
    async fn reap(&mut self) -> Option<ExitStatus> {
        let mut guard = self.child.lock().await;
        let child = guard.as_mut()?;

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Failed to wait for natter: {}", e);
                None
            }
            Err(_) => {
                warn!("natter closed its output but is still running");
                None
            }
        }
    }

    /// Stop the child: SIGTERM, wait for the grace period, then SIGKILL
    ///
    /// Clears the child handle and the cached endpoint so the next start
    /// reconciles from scratch.
    pub async fn stop(&mut self) {
        let mut guard = self.child.lock().await;

        if let Some(mut child) = guard.take() {
            info!("Stopping natter...");

            if let Err(e) = send_terminate(&mut child) {
                warn!("Failed to signal natter: {}", e);
            }

            match tokio::time::timeout(self.stop_grace, child.wait()).await {
                Ok(Ok(status)) => debug!("natter exited: {}", status),
                Ok(Err(e)) => warn!("Failed to wait for natter: {}", e),
                Err(_) => {
                    warn!("natter did not exit within {:?}, killing it", self.stop_grace);
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill natter: {}", e);
                    }
                }
            }
        }

        drop(guard);
        self.output = None;
        self.current = None;
    }

    /// Stop, pause, start again
    ///
    /// The restart flag is cleared only if the new child starts.
    pub async fn restart(&mut self) -> Result<u32> {
        warn!("Restarting natter...");

        self.stop().await;

        if !self.control.sleep(self.restart_pause).await {
            return Err(Error::process("shutdown requested during restart"));
        }

        match self.start().await {
            Ok(pid) => {
                self.control.clear_restart();
                info!("natter restarted");
                Ok(pid)
            }
            Err(e) => {
                error!("natter restart failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Start the thread that turns the pipe into lines
fn spawn_output_reader(reader: os_pipe::PipeReader) -> Result<OutputStream> {
    let (tx, rx) = mpsc::channel(OUTPUT_BUFFER_LINES);

    std::thread::Builder::new()
        .name("natter-output".to_string())
        .spawn(move || pump_lines(io::BufReader::new(reader), tx))
        .map_err(|e| Error::process(format!("failed to start output reader: {}", e)))?;

    Ok(ReceiverStream::new(rx))
}

/// Forward lines until EOF, a read error, or the monitor going away
fn pump_lines<R: BufRead>(mut reader: R, tx: mpsc::Sender<io::Result<Vec<u8>>>) {
    loop {
        let mut line = Vec::new();
        match read_capped_line(&mut reader, &mut line, MAX_LINE_BYTES) {
            Ok(0) => return,
            Ok(_) => {
                if tx.blocking_send(Ok(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

/// Read one `\n`-terminated line, keeping at most `max` bytes of it
///
/// Returns the number of bytes consumed from `reader` (0 at EOF). The
/// newline is consumed but not stored.
pub fn read_capped_line<R: BufRead>(
    reader: &mut R,
    line: &mut Vec<u8>,
    max: usize,
) -> io::Result<usize> {
    let mut consumed = 0;

    loop {
        let (done, used) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(consumed);
            }

            let (chunk, done, used) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], true, i + 1),
                None => (available, false, available.len()),
            };
            let room = max.saturating_sub(line.len());
            line.extend_from_slice(&chunk[..chunk.len().min(room)]);
            (done, used)
        };

        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}

/// Ask the child to exit
#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // `id()` is None once the child has been reaped, so a recycled pid is never signalled
    let Some(pid) = child.id() else {
        return Ok(());
    };

    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

/// Ask the child to exit
#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn command_line_has_port_then_extra_args() {
        let config = NatterConfig {
            script: PathBuf::from("/opt/natter/natter.py"),
            interpreter: "python3".to_string(),
            port: 25565,
            args: vec!["-m".to_string(), "iptables".to_string()],
        };

        let command = ChildCommand::from_config(&config);
        assert_eq!(command.program, "python3");
        assert_eq!(
            command.args,
            vec!["/opt/natter/natter.py", "-p", "25565", "-m", "iptables"]
        );
        assert_eq!(
            command.to_string(),
            "python3 /opt/natter/natter.py -p 25565 -m iptables"
        );
    }

    #[tokio::test]
    async fn spawn_failure_leaves_supervisor_stopped() {
        let command = ChildCommand {
            program: "/nonexistent/natter-interpreter".to_string(),
            args: Vec::new(),
        };
        let mut supervisor = Supervisor::with_command(command, Control::new(), &Timings::default());

        assert!(supervisor.start().await.is_err());
        assert!(!supervisor.is_started());
        assert_eq!(supervisor.handle().pid().await, None);
    }

    #[test]
    fn supervisor_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Supervisor>();
        assert_send_sync::<ChildHandle>();
    }

    #[tokio::test]
    async fn failed_restart_keeps_restart_flag() {
        let control = Control::new();
        let timings = Timings {
            restart_pause: Duration::from_millis(10),
            ..Timings::default()
        };
        let mut supervisor = Supervisor::with_command(
            ChildCommand {
                program: "/nonexistent/natter-interpreter".to_string(),
                args: Vec::new(),
            },
            control.clone(),
            &timings,
        );

        control.request_restart();
        assert!(supervisor.restart().await.is_err());
        assert!(control.restart_requested(), "flag survives a failed start");
        assert!(!supervisor.is_started());
    }

    #[test]
    fn lines_are_split_on_newline() {
        let mut reader = io::Cursor::new(b"first\nsecond\r\nlast".to_vec());
        let mut lines = Vec::new();
        loop {
            let mut line = Vec::new();
            if read_capped_line(&mut reader, &mut line, MAX_LINE_BYTES).unwrap() == 0 {
                break;
            }
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![b"first".to_vec(), b"second\r".to_vec(), b"last".to_vec()]
        );
    }

    #[test]
    fn over_long_line_is_truncated_not_buffered() {
        let mut input = vec![b'x'; 100];
        input.extend_from_slice(b"\nnext\n");
        let mut reader = io::BufReader::with_capacity(16, io::Cursor::new(input));

        let mut line = Vec::new();
        assert_eq!(read_capped_line(&mut reader, &mut line, 10).unwrap(), 101);
        assert_eq!(line, vec![b'x'; 10]);

        let mut line = Vec::new();
        read_capped_line(&mut reader, &mut line, 10).unwrap();
        assert_eq!(line, b"next".to_vec());
    }

    #[test]
    fn output_pipe_keeps_write_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let input = io::Cursor::new(b"a\nb\nc\n".to_vec());
        pump_lines(input, tx);

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn terminate_without_child_is_a_no_op() {
        let supervisor = Supervisor::with_command(
            ChildCommand {
                program: "true".to_string(),
                args: Vec::new(),
            },
            Control::new(),
            &Timings::default(),
        );
        assert!(!supervisor.handle().terminate().await);
    }
}
