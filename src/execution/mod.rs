//! Evaluator: runs one block of console input against a tab's namespace and
//! records everything it produces in the tab's sink.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::interp::ast::{Stmt, StmtKind};
use crate::interp::{
    parse_module, Interpreter, Namespace, PyResult, SourceText, Value, DEFAULT_RECURSION_LIMIT,
};
use crate::output::{OutputSink, SegmentKind};
use crate::redirect::{self, SharedReader, Stream, Targets};

/// Marker in front of every echoed input line.
pub const PROMPT: &str = ">>> ";

/// File name shown in tracebacks and syntax errors.
pub const SOURCE_NAME: &str = "<console>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    Success,
    SyntaxError,
    RuntimeError,
}

/// Outcome of one execution. Errors carry the text that was written to the
/// sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub kind: ExecutionKind,
    pub trace: Option<String>,
}

impl ExecutionResult {
    fn success() -> Self {
        Self {
            kind: ExecutionKind::Success,
            trace: None,
        }
    }

    fn failure(kind: ExecutionKind, trace: String) -> Self {
        Self {
            kind,
            trace: Some(trace),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind != ExecutionKind::Success
    }
}

#[derive(Clone)]
pub struct ExecutionOptions {
    pub echo: bool,
    pub tee: bool,
    pub recursion_limit: usize,
    pub reader: Option<SharedReader>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            echo: true,
            tee: false,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            reader: None,
        }
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("echo", &self.echo)
            .field("tee", &self.tee)
            .field("recursion_limit", &self.recursion_limit)
            .field("reader", &self.reader.is_some())
            .finish()
    }
}

/// Strips leading blank lines and trailing whitespace, then removes the
/// indentation every non-blank line shares. `None` when nothing is left to
/// run.
pub fn normalize_source(source: &str) -> Option<Cow<'_, str>> {
    let trimmed = source.trim_end();
    let mut start = 0;
    for line in trimmed.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    let body = &trimmed[start..];
    if body.is_empty() {
        return None;
    }

    let margin = common_margin(body);
    if margin.is_empty() {
        return Some(Cow::Borrowed(body));
    }
    let mut dedented = String::with_capacity(body.len());
    for line in body.split_inclusive('\n') {
        if line.trim().is_empty() {
            if line.ends_with('\n') {
                dedented.push('\n');
            }
        } else {
            dedented.push_str(line.strip_prefix(margin).unwrap_or(line));
        }
    }
    Some(Cow::Owned(dedented))
}

/// Longest run of leading spaces and tabs shared by every non-blank line.
fn common_margin(body: &str) -> &str {
    let mut margin: Option<&str> = None;
    for line in body.lines().filter(|line| !line.trim().is_empty()) {
        let indent = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        margin = Some(match margin {
            None => indent,
            Some(current) => {
                let shared = current
                    .bytes()
                    .zip(indent.bytes())
                    .take_while(|(a, b)| a == b)
                    .count();
                &current[..shared]
            }
        });
    }
    margin.unwrap_or("")
}

/// The echoed form of `source`: every line behind the prompt marker.
pub fn echo_text(source: &str) -> String {
    source
        .lines()
        .map(|line| format!("{}{}", PROMPT, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs `source` with default options. Returns `None` for blank input.
pub fn execute(
    source: &str,
    namespace: &Namespace,
    echo: bool,
    sink: &OutputSink,
) -> Option<ExecutionResult> {
    let options = ExecutionOptions {
        echo,
        ..ExecutionOptions::default()
    };
    execute_with(source, namespace, sink, &options)
}

pub fn execute_with(
    source: &str,
    namespace: &Namespace,
    sink: &OutputSink,
    options: &ExecutionOptions,
) -> Option<ExecutionResult> {
    let normalized = normalize_source(source)?;
    let source = normalized.as_ref();
    debug!(lines = source.lines().count(), echo = options.echo, "executing");

    if options.echo {
        sink.push(SegmentKind::Input, echo_text(source));
    }

    let text = SourceText::new(SOURCE_NAME, source);
    let body = match parse_module(&text, source) {
        Ok(body) => body,
        Err(err) => {
            let trace = err.format();
            warn!(line = err.line, column = err.column, "syntax error: {}", trace.trim_end());
            sink.push(SegmentKind::Error, trace.clone());
            return Some(ExecutionResult::failure(ExecutionKind::SyntaxError, trace));
        }
    };

    let targets = Targets::sink(sink)
        .with_reader(options.reader.clone())
        .with_tee(options.tee);
    let guard = redirect::begin(targets);
    let mut interp =
        Interpreter::new(namespace.clone()).with_recursion_limit(options.recursion_limit);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&mut interp, &body, &text)));
    guard.end();

    let result = match outcome {
        Ok(Ok(())) => ExecutionResult::success(),
        Ok(Err(exc)) => {
            let trace = exc.format();
            warn!(kind = exc.kind().name(), "execution raised: {}", trace.trim_end());
            sink.push(SegmentKind::Error, trace.clone());
            ExecutionResult::failure(ExecutionKind::RuntimeError, trace)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("interpreter panicked: {}", message);
            let trace = format!("InternalError: interpreter failure: {}\n", message);
            sink.push(SegmentKind::Error, trace.clone());
            ExecutionResult::failure(ExecutionKind::RuntimeError, trace)
        }
    };
    Some(result)
}

/// A lone expression statement is evaluated and its value echoed, the way
/// an interactive prompt does. Anything else runs as a module body.
fn run(interp: &mut Interpreter, body: &[Stmt], text: &Rc<SourceText>) -> PyResult<()> {
    if let [Stmt {
        kind: StmtKind::Expr(expr),
        ..
    }] = body
    {
        let value = interp.eval_expression(expr, text)?;
        if !matches!(value, Value::None) {
            redirect::write(Stream::Stdout, &format!("{}\n", value.try_repr()?));
        }
        return Ok(());
    }
    interp.run_module(body, text)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_leading_blank_lines_and_trailing_space() {
        assert_eq!(normalize_source("\n  \nx = 1\n\n").as_deref(), Some("x = 1"));
        assert_eq!(normalize_source(" \n\t\n"), None);
        assert_eq!(normalize_source(""), None);
    }

    #[test]
    fn normalize_removes_shared_indentation() {
        assert_eq!(normalize_source("  x = 1\n").as_deref(), Some("x = 1"));
        assert_eq!(
            normalize_source("    if x:\n\n        y\n    z\n").as_deref(),
            Some("if x:\n\n    y\nz")
        );
        assert_eq!(normalize_source("\tif x:\n  y").as_deref(), Some("\tif x:\n  y"));
        assert!(matches!(normalize_source("x = 1\n"), Some(Cow::Borrowed("x = 1"))));
    }

    #[test]
    fn indented_input_runs() {
        let ns = Namespace::new();
        let sink = OutputSink::new();
        let result = execute("  x = 1\n  print(x + 1)\n", &ns, true, &sink).unwrap();
        assert_eq!(result.kind, ExecutionKind::Success);
        assert_eq!(sink.text(), ">>> x = 1\n>>> print(x + 1)\n2\n");
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failures_are_logged_as_warnings() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let ns = Namespace::new();
        let sink = OutputSink::new();
        tracing::subscriber::with_default(subscriber, || {
            execute("1 / 0", &ns, false, &sink);
            execute("x = (", &ns, false, &sink);
        });

        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("WARN"), "{}", text);
        assert!(text.contains("ZeroDivisionError: division by zero"), "{}", text);
        assert!(text.contains("SyntaxError"), "{}", text);
    }

    #[test]
    fn echo_prefixes_every_line() {
        assert_eq!(echo_text("x = 1"), ">>> x = 1");
        assert_eq!(
            echo_text("for i in a:\n    print(i)"),
            ">>> for i in a:\n>>>     print(i)"
        );
    }

    #[test]
    fn none_valued_expression_prints_nothing() {
        let ns = Namespace::new();
        let sink = OutputSink::new();
        let result = execute("print", &ns, false, &sink);
        assert_eq!(result.map(|r| r.kind), Some(ExecutionKind::Success));
        assert_eq!(sink.text(), "<built-in function print>\n");

        sink.clear();
        execute("None", &ns, false, &sink);
        assert!(sink.is_empty());
    }

    #[test]
    fn multi_statement_blocks_do_not_echo_values() {
        let ns = Namespace::new();
        let sink = OutputSink::new();
        execute("1 + 1\n2 + 2", &ns, false, &sink);
        assert!(sink.is_empty());
    }

    #[test]
    fn output_and_errors_interleave_in_order() {
        let ns = Namespace::new();
        let sink = OutputSink::new();
        let source = "import sys\nprint('a')\nsys.stderr.write('b\\n')\nprint('c')\nraise KeyError('k')";
        let result = execute(source, &ns, false, &sink).unwrap();
        assert_eq!(result.kind, ExecutionKind::RuntimeError);

        let kinds: Vec<_> = sink.segments().into_iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::Output,
                SegmentKind::Error,
                SegmentKind::Output,
                SegmentKind::Error
            ]
        );
        let trace = result.trace.unwrap();
        assert!(trace.starts_with("Traceback (most recent call last):\n"));
        assert!(trace.contains("  File \"<console>\", line 5, in <module>\n"));
        assert!(trace.ends_with("KeyError: 'k'\n"));
    }

    #[test]
    fn syntax_error_points_at_the_column() {
        let ns = Namespace::new();
        let sink = OutputSink::new();
        let result = execute("x = (1 +", &ns, true, &sink).unwrap();
        assert_eq!(result.kind, ExecutionKind::SyntaxError);
        let segments = sink.segments();
        assert_eq!(segments[0].text, ">>> x = (1 +");
        assert_eq!(segments[1].kind, SegmentKind::Error);
        assert!(segments[1].text.contains("SyntaxError"));
        assert!(!ns.contains("x"));
    }
}
