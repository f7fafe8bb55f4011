//! External command execution with live, line-by-line output delivery.
//!
//! ## `execute` — delivery protocol
//!
//! 1. Spawn the command with stdout and stderr piped.
//! 2. One reader thread per pipe splits its stream into lines and pushes each
//!    line into a shared bounded queue ([`QUEUE_CAPACITY`] entries), followed
//!    by an end-of-stream marker.
//! 3. The calling thread is the only consumer: it pops entries and invokes the
//!    matching [`ProgressSink`] method, one call at a time, until it has seen
//!    the end marker of both readers.
//! 4. Both readers are joined, then the process is waited on.
//! 5. A non-zero exit becomes [`ExecError::ProcessFailed`].
//!
//! A slow sink blocks the readers on the full queue and, behind them, the
//! child on its pipe buffer; no line is ever dropped. Lines are decoded as
//! UTF-8 with invalid bytes replaced.

use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::ExecError;

/// Capacity of the queue between the reader threads and the dispatcher.
pub const QUEUE_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives the output of a command, one line per call, trailing newline
/// included. Calls are never concurrent.
pub trait ProgressSink {
    fn on_output_line(&mut self, line: &str) -> io::Result<()>;
    fn on_error_line(&mut self, line: &str) -> io::Result<()>;
}

impl<S: ProgressSink + ?Sized> ProgressSink for &mut S {
    fn on_output_line(&mut self, line: &str) -> io::Result<()> {
        (**self).on_output_line(line)
    }

    fn on_error_line(&mut self, line: &str) -> io::Result<()> {
        (**self).on_error_line(line)
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ProgressSink for Discard {
    fn on_output_line(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }

    fn on_error_line(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// One line recorded by a [`Transcript`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptLine {
    Output(String),
    Error(String),
}

/// Records every line in delivery order while forwarding it to `inner`.
///
/// Callers that need the full progress history after a failure run the
/// operation through a transcript and read [`Transcript::lines`] afterwards.
#[derive(Debug, Default)]
pub struct Transcript<S> {
    inner: S,
    lines: Vec<TranscriptLine>,
}

impl<S: ProgressSink> Transcript<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lines: Vec::new(),
        }
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<TranscriptLine> {
        self.lines
    }

    /// Concatenated text of the stdout-side lines.
    pub fn output_text(&self) -> String {
        self.lines
            .iter()
            .filter_map(|l| match l {
                TranscriptLine::Output(s) => Some(s.as_str()),
                TranscriptLine::Error(_) => None,
            })
            .collect()
    }

    /// Concatenated text of the stderr-side lines.
    pub fn error_text(&self) -> String {
        self.lines
            .iter()
            .filter_map(|l| match l {
                TranscriptLine::Error(s) => Some(s.as_str()),
                TranscriptLine::Output(_) => None,
            })
            .collect()
    }
}

impl<S: ProgressSink> ProgressSink for Transcript<S> {
    fn on_output_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.push(TranscriptLine::Output(line.to_string()));
        self.inner.on_output_line(line)
    }

    fn on_error_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.push(TranscriptLine::Error(line.to_string()));
        self.inner.on_error_line(line)
    }
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum Event {
    Line(Stream, String),
    ReadFailed(Stream, io::Error),
    Closed(Stream),
}

#[derive(Default)]
struct Dispatched {
    sink_error: Option<io::Error>,
    read_error: Option<io::Error>,
}

/// Run `command` in `working_dir` and block until it exits.
///
/// With a sink, every stdout line goes to [`ProgressSink::on_output_line`] and
/// every stderr line to [`ProgressSink::on_error_line`], on the calling
/// thread. Without a sink the child inherits the current stdout/stderr.
///
/// A non-zero exit always yields [`ExecError::ProcessFailed`], even if the
/// sink also failed; a failing sink stops receiving lines but the pipes are
/// still drained to the end before the error is returned.
pub fn execute<S: AsRef<OsStr>>(
    command: &[S],
    working_dir: Option<&Path>,
    sink: Option<&mut dyn ProgressSink>,
) -> Result<(), ExecError> {
    let (program, args) = command.split_first().ok_or(ExecError::EmptyCommand)?;
    let display = display_command(command);

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    tracing::debug!("exec: {display}");

    let status = match sink {
        None => cmd.status().map_err(|source| ExecError::Spawn {
            command: display.clone(),
            source,
        })?,
        Some(sink) => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            let child = cmd.spawn().map_err(|source| ExecError::Spawn {
                command: display.clone(),
                source,
            })?;
            let (status, dispatched) = pump(child, &display, sink)?;

            if !status.success() {
                return Err(failed(display, status));
            }
            if let Some(source) = dispatched.sink_error {
                return Err(ExecError::Sink {
                    command: display,
                    source,
                });
            }
            if let Some(source) = dispatched.read_error {
                return Err(ExecError::Io {
                    command: display,
                    source,
                });
            }
            status
        }
    };

    if !status.success() {
        return Err(failed(display, status));
    }
    Ok(())
}

/// Run `command` and return everything it printed on stdout.
///
/// Stderr is collected too and logged at debug level when the command fails.
pub fn capture<S: AsRef<OsStr>>(
    command: &[S],
    working_dir: Option<&Path>,
) -> Result<String, ExecError> {
    let mut transcript = Transcript::new(Discard);
    let result = execute(command, working_dir, Some(&mut transcript));
    if let Err(err) = &result {
        let stderr = transcript.error_text();
        if !stderr.is_empty() {
            tracing::debug!("{err}: {}", stderr.trim_end());
        }
    }
    result.map(|()| transcript.output_text())
}

fn pump(
    mut child: Child,
    display: &str,
    sink: &mut dyn ProgressSink,
) -> Result<(ExitStatus, Dispatched), ExecError> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ExecError::Io {
            command: display.to_string(),
            source: io::Error::other("output pipes were not captured"),
        });
    };

    // Scoped threads are joined before `scope` returns, on every path.
    let dispatched = thread::scope(|scope| {
        let (tx, rx) = bounded::<Event>(QUEUE_CAPACITY);
        let stdout_tx = tx.clone();
        let stdout_reader = scope.spawn(move || read_lines(Stream::Stdout, stdout, stdout_tx));
        let stderr_reader = scope.spawn(move || read_lines(Stream::Stderr, stderr, tx));

        let dispatched = dispatch(&rx, sink);
        drop(rx);

        for reader in [stdout_reader, stderr_reader] {
            if reader.join().is_err() {
                tracing::warn!("output reader for `{display}` panicked");
            }
        }
        dispatched
    });

    let status = child.wait().map_err(|source| ExecError::Io {
        command: display.to_string(),
        source,
    })?;
    Ok((status, dispatched))
}

fn read_lines(stream: Stream, source: impl Read, tx: Sender<Event>) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(Event::Line(stream, line)).is_err() {
                    // Dispatcher is gone; nobody is left to tell.
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Event::ReadFailed(stream, e));
                break;
            }
        }
    }
    let _ = tx.send(Event::Closed(stream));
}

fn dispatch(rx: &Receiver<Event>, sink: &mut dyn ProgressSink) -> Dispatched {
    let mut open = 2;
    let mut outcome = Dispatched::default();
    while open > 0 {
        let Ok(event) = rx.recv() else {
            break;
        };
        match event {
            Event::Line(stream, line) => {
                if outcome.sink_error.is_some() {
                    continue;
                }
                let delivered = match stream {
                    Stream::Stdout => sink.on_output_line(&line),
                    Stream::Stderr => sink.on_error_line(&line),
                };
                if let Err(e) = delivered {
                    outcome.sink_error = Some(e);
                }
            }
            Event::ReadFailed(stream, e) => {
                tracing::warn!("reading {stream:?} failed: {e}");
                outcome.read_error.get_or_insert(e);
            }
            Event::Closed(_) => open -= 1,
        }
    }
    outcome
}

fn failed(command: String, status: ExitStatus) -> ExecError {
    ExecError::ProcessFailed {
        command,
        exit_code: status.code(),
    }
}

fn display_command<S: AsRef<OsStr>>(command: &[S]) -> String {
    command
        .iter()
        .map(|part| part.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
