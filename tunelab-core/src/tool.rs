//! External tool runner.
//!
//! Spawns a process, forwards every chunk of its stdout/stderr to a log sink,
//! and resolves on exit code 0. The runner never looks at what the tool
//! printed; callers discover results through [`crate::artifact`].
//!
//! Waiting is a poll loop so that a [`CancelToken`] or a timeout can kill the
//! child without a dedicated signal thread.
//!
//! On unix every tool runs in its own process group. Killing a tool kills the
//! whole group, and any member still alive when the tool exits is killed too,
//! so no worker keeps writing into the shared output directories once `run`
//! has returned.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Where tool output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// The caller's stdout/stderr.
    Console,
    /// Appended to a file, stdout and stderr interleaved.
    File(PathBuf),
}

/// One external process to run.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Short label used in errors and logs ("optimizer", "backtester").
    pub tool: String,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    pub log: LogSink,
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, program: impl Into<OsString>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            log: LogSink::Console,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn log_to(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Clone)]
enum SinkWriter {
    Console,
    File(Arc<Mutex<File>>),
}

impl SinkWriter {
    fn open(sink: &LogSink) -> Result<Self> {
        match sink {
            LogSink::Console => Ok(SinkWriter::Console),
            LogSink::File(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| Error::io(path, e))?;
                Ok(SinkWriter::File(Arc::new(Mutex::new(file))))
            }
        }
    }

    fn write_chunk(&self, stream: Stream, chunk: &[u8]) -> io::Result<()> {
        match self {
            SinkWriter::File(file) => {
                let mut file = file
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "log sink poisoned"))?;
                file.write_all(chunk)?;
                file.flush()
            }
            SinkWriter::Console => match stream {
                Stream::Stdout => {
                    let mut out = io::stdout().lock();
                    out.write_all(chunk)?;
                    out.flush()
                }
                Stream::Stderr => {
                    let mut err = io::stderr().lock();
                    err.write_all(chunk)?;
                    err.flush()
                }
            },
        }
    }
}

/// How long `run` keeps draining output after the tool exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

fn forward<R>(
    mut reader: R,
    sink: SinkWriter,
    stream: Stream,
    tool: &str,
    done: Sender<()>,
) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let suffix = match stream {
        Stream::Stdout => "out",
        Stream::Stderr => "err",
    };
    let name = format!("{tool}-{suffix}");
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = sink.write_chunk(stream, &buf[..n]) {
                            warn!(error = %e, "failed to forward tool output");
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = done.send(());
        })
        .map_err(|e| Error::io(Path::new("<thread>"), e))
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// SIGKILL every process in the group led by `child`.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal. A group with no members left yields
    // ESRCH, which is fine to ignore.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn kill_and_reap(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for the output forwarders to hit EOF, at most [`DRAIN_GRACE`].
///
/// Readers still blocked after that (a pipe inherited by a process outside
/// the group) are detached.
fn drain(readers: Vec<JoinHandle<()>>, done: Receiver<()>, cancel: &CancelToken, tool: &str, poll: Duration) {
    let deadline = Instant::now() + DRAIN_GRACE;
    let mut pending = readers.len();
    while pending > 0 {
        let now = Instant::now();
        if now >= deadline || cancel.is_cancelled() {
            warn!(tool, pending, "tool output still open after exit, detaching readers");
            return;
        }
        match done.recv_timeout((deadline - now).min(poll)) {
            Ok(()) => pending -= 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    for reader in readers {
        let _ = reader.join();
    }
}

/// Runs external tools to completion.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    poll_interval: Duration,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl ToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run `invocation` and wait for it to exit.
    ///
    /// - exit code 0 → `Ok(status)`
    /// - any other exit → [`Error::ToolFailure`]
    /// - timeout elapsed → child killed, [`Error::Timeout`]
    /// - `cancel` set → child killed, [`Error::Cancelled`]
    pub fn run(&self, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<ExitStatus> {
        cancel.check()?;
        let sink = SinkWriter::open(&invocation.log)?;

        info!(
            tool = %invocation.tool,
            program = ?invocation.program,
            args = ?invocation.args,
            cwd = %invocation.working_dir.display(),
            "starting tool"
        );
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut command);
        let mut child = command
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::not_found("executable", PathBuf::from(&invocation.program))
                } else {
                    Error::io(Path::new(&invocation.program), e)
                }
            })?;

        let (done_tx, done_rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(forward(out, sink.clone(), Stream::Stdout, &invocation.tool, done_tx.clone())?);
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward(err, sink, Stream::Stderr, &invocation.tool, done_tx)?);
        }

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill_and_reap(&mut child);
                    return Err(Error::io(&invocation.working_dir, e));
                }
            }
            if cancel.is_cancelled() {
                warn!(tool = %invocation.tool, "cancelled, killing tool");
                kill_and_reap(&mut child);
                return Err(Error::Cancelled);
            }
            if let Some(limit) = invocation.timeout {
                if started.elapsed() >= limit {
                    warn!(tool = %invocation.tool, after_secs = limit.as_secs(), "timed out, killing tool");
                    kill_and_reap(&mut child);
                    return Err(Error::Timeout {
                        tool: invocation.tool.clone(),
                        after: limit,
                    });
                }
            }
            thread::sleep(self.poll_interval);
        };

        // Leftover group members would keep writing and keep the pipes open.
        kill_group(&child);
        drain(readers, done_rx, cancel, &invocation.tool, self.poll_interval);
        debug!(tool = %invocation.tool, elapsed_ms = started.elapsed().as_millis() as u64, ?status, "tool exited");

        if status.success() {
            Ok(status)
        } else {
            Err(Error::ToolFailure {
                tool: invocation.tool.clone(),
                exit_code: status.code(),
            })
        }
    }
}
