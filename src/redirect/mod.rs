//! Stream Redirector.
//!
//! The interpreter's `print`, `sys.stdout.write`, `sys.stderr.write` and
//! `input` all go through the process-wide channel table kept here. An
//! execution installs its tab's sink with [`begin`] and the returned guard
//! puts the previous targets back when dropped, including during unwinding.
//!
//! Only one thread may hold a redirection at a time. A second thread calling
//! [`begin`] waits until the first has released every guard it took, which
//! is what keeps two executions from interleaving into each other's sinks.
//! The owning thread itself may nest redirections freely.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, trace};

use crate::output::{OutputSink, SegmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn segment_kind(self) -> SegmentKind {
        match self {
            Stream::Stdout => SegmentKind::Output,
            Stream::Stderr => SegmentKind::Error,
        }
    }
}

/// Supplies lines to `input()`.
pub trait LineReader: Send {
    /// Shows `prompt` and returns the entered line, or `None` at end of input.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

pub type SharedReader = Arc<Mutex<dyn LineReader>>;

pub fn shared_reader(reader: impl LineReader + 'static) -> SharedReader {
    Arc::new(Mutex::new(reader))
}

/// What the channels point at while a redirection is active. `None` falls
/// through to the real process stream.
#[derive(Clone, Default)]
pub struct Targets {
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
    pub reader: Option<SharedReader>,
    /// Also forward captured writes to the real stdout/stderr.
    pub tee: bool,
}

impl Targets {
    /// Both output channels into one sink.
    pub fn sink(sink: &OutputSink) -> Self {
        Self {
            stdout: Some(sink.clone()),
            stderr: Some(sink.clone()),
            ..Self::default()
        }
    }

    pub fn with_reader(mut self, reader: Option<SharedReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }
}

impl fmt::Debug for Targets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Targets")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("reader", &self.reader.is_some())
            .field("tee", &self.tee)
            .finish()
    }
}

struct Channels {
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    reader: Option<SharedReader>,
    tee: bool,
    owner: Option<ThreadId>,
    depth: usize,
}

impl Channels {
    fn install(&mut self, targets: Targets) -> Targets {
        let previous = Targets {
            stdout: self.stdout.take(),
            stderr: self.stderr.take(),
            reader: self.reader.take(),
            tee: self.tee,
        };
        self.stdout = targets.stdout;
        self.stderr = targets.stderr;
        self.reader = targets.reader;
        self.tee = targets.tee;
        previous
    }
}

static CHANNELS: Mutex<Channels> = Mutex::new(Channels {
    stdout: None,
    stderr: None,
    reader: None,
    tee: false,
    owner: None,
    depth: 0,
});

static RELEASED: Condvar = Condvar::new();

fn channels() -> MutexGuard<'static, Channels> {
    CHANNELS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a redirection installed. Dropping it restores the targets that
/// were active when it was created. Tied to the thread that created it.
#[must_use = "the redirection ends as soon as the guard is dropped"]
pub struct RedirectGuard {
    previous: Option<Targets>,
    _thread_bound: PhantomData<*const ()>,
}

impl RedirectGuard {
    /// Ends the redirection now rather than at scope exit.
    pub fn end(self) {}
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let mut channels = channels();
        channels.install(previous);
        channels.depth = channels.depth.saturating_sub(1);
        debug!(depth = channels.depth, "redirection restored");
        if channels.depth == 0 {
            channels.owner = None;
            RELEASED.notify_all();
        }
    }
}

/// Points the channels at `targets` until the guard is dropped. Blocks while
/// another thread holds a redirection.
pub fn begin(targets: Targets) -> RedirectGuard {
    let me = thread::current().id();
    let mut channels = channels();
    while channels.owner.is_some_and(|owner| owner != me) {
        channels = RELEASED
            .wait(channels)
            .unwrap_or_else(PoisonError::into_inner);
    }
    channels.owner = Some(me);
    channels.depth += 1;
    debug!(depth = channels.depth, ?targets, "redirection installed");
    let previous = channels.install(targets);
    RedirectGuard {
        previous: Some(previous),
        _thread_bound: PhantomData,
    }
}

/// Whether any redirection is currently installed.
pub fn is_active() -> bool {
    channels().depth > 0
}

/// Writes to a channel: the installed sink, the real stream, or both.
pub fn write(stream: Stream, text: &str) {
    if text.is_empty() {
        return;
    }
    let (target, tee) = {
        let channels = channels();
        let target = match stream {
            Stream::Stdout => channels.stdout.clone(),
            Stream::Stderr => channels.stderr.clone(),
        };
        (target, channels.tee)
    };
    match target {
        Some(sink) => {
            trace!(?stream, len = text.len(), "captured write");
            sink.write(stream.segment_kind(), text);
            if tee {
                write_process(stream, text);
            }
        }
        None => write_process(stream, text),
    }
}

fn write_process(stream: Stream, text: &str) {
    let _ = match stream {
        Stream::Stdout => {
            let mut out = io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|_| out.flush())
        }
        Stream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
    };
}

/// Reads one line for `input()`. With a reader installed the prompt and the
/// answer are echoed to stdout afterwards, as a terminal would have shown
/// them. Otherwise the prompt is written to stdout and the real stdin read.
pub fn read_line(prompt: &str) -> io::Result<Option<String>> {
    let reader = channels().reader.clone();
    match reader {
        Some(reader) => {
            let line = reader
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read_line(prompt)?;
            if let Some(line) = &line {
                write(
                    Stream::Stdout,
                    &format!("{}{}\n", prompt, line.trim_end_matches(['\r', '\n'])),
                );
            }
            Ok(line)
        }
        None => {
            write(Stream::Stdout, prompt);
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                return Ok(None);
            }
            Ok(Some(line))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::panic;

    use super::*;

    struct Scripted(VecDeque<String>, Vec<String>);

    impl LineReader for Scripted {
        fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
            self.1.push(prompt.to_string());
            Ok(self.0.pop_front())
        }
    }

    #[test]
    fn writes_land_in_the_installed_sink() {
        let sink = OutputSink::new();
        {
            let _guard = begin(Targets::sink(&sink));
            assert!(is_active());
            write(Stream::Stdout, "out\n");
            write(Stream::Stderr, "err\n");
            write(Stream::Stdout, "");
        }
        write(Stream::Stdout, "");
        let segments = sink.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].kind, SegmentKind::Output);
        assert_eq!(segments[1].kind, SegmentKind::Error);
        assert_eq!(segments[1].text, "err\n");
    }

    #[test]
    fn nested_guards_restore_in_reverse_order() {
        let outer = OutputSink::new();
        let inner = OutputSink::new();
        let guard = begin(Targets::sink(&outer));
        write(Stream::Stdout, "1");
        {
            let _inner = begin(Targets::sink(&inner));
            write(Stream::Stdout, "2");
        }
        write(Stream::Stdout, "3");
        guard.end();

        assert_eq!(outer.text(), "13");
        assert_eq!(inner.text(), "2");
    }

    #[test]
    fn separate_stdout_and_stderr_targets() {
        let out = OutputSink::new();
        let err = OutputSink::new();
        let _guard = begin(Targets {
            stdout: Some(out.clone()),
            stderr: Some(err.clone()),
            ..Targets::default()
        });
        write(Stream::Stderr, "e");
        write(Stream::Stdout, "o");
        assert_eq!(out.text(), "o");
        assert_eq!(err.text(), "e");
    }

    #[test]
    fn guard_restores_during_unwinding() {
        let sink = OutputSink::new();
        let after = OutputSink::new();
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = begin(Targets::sink(&sink));
            write(Stream::Stdout, "before");
            panic!("execution aborted");
        }));
        assert!(result.is_err());

        let _guard = begin(Targets::sink(&after));
        write(Stream::Stdout, "after");
        assert_eq!(sink.text(), "before");
        assert_eq!(after.text(), "after");
    }

    #[test]
    fn other_threads_wait_for_the_active_redirection() {
        let first = OutputSink::new();
        let second = OutputSink::new();
        let guard = begin(Targets::sink(&first));

        let handle = {
            let second = second.clone();
            thread::spawn(move || {
                let _guard = begin(Targets::sink(&second));
                write(Stream::Stdout, "second");
            })
        };
        write(Stream::Stdout, "first");
        drop(guard);
        handle.join().unwrap();

        assert_eq!(first.text(), "first");
        assert_eq!(second.text(), "second");
    }

    #[test]
    fn input_reads_through_the_installed_reader() {
        let sink = OutputSink::new();
        let reader = Arc::new(Mutex::new(Scripted(
            VecDeque::from(vec!["42\n".to_string()]),
            Vec::new(),
        )));
        let shared: SharedReader = reader.clone();
        let _guard = begin(Targets::sink(&sink).with_reader(Some(shared)));

        assert_eq!(read_line("n? ").unwrap().as_deref(), Some("42\n"));
        assert_eq!(read_line("again? ").unwrap(), None);
        assert_eq!(sink.text(), "n? 42\n");
        assert_eq!(reader.lock().unwrap().1, vec!["n? ", "again? "]);
    }
}
