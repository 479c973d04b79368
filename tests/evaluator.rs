use dcc_console::execution::{self, ExecutionKind};
use dcc_console::interp::{Namespace, Value};
use dcc_console::output::{OutputSink, SegmentKind};
use dcc_console::session::HostBindings;

fn fresh() -> (Namespace, OutputSink) {
    let ns = Namespace::new();
    HostBindings::new().seed(&ns);
    (ns, OutputSink::new())
}

fn kinds(sink: &OutputSink) -> Vec<SegmentKind> {
    sink.segments().iter().map(|s| s.kind).collect()
}

#[test]
fn variables_persist_between_executions() {
    let (ns, sink) = fresh();
    execution::execute("x = 41", &ns, false, &sink).unwrap();
    execution::execute("x = x + 1", &ns, false, &sink).unwrap();
    let result = execution::execute("print(x)", &ns, false, &sink).unwrap();

    assert_eq!(result.kind, ExecutionKind::Success);
    assert!(matches!(ns.get("x"), Some(Value::Int(42))));
    assert_eq!(sink.text(), "42\n");
}

#[test]
fn assignment_is_echoed_without_output() {
    let (ns, sink) = fresh();
    let result = execution::execute("x = 1", &ns, true, &sink).unwrap();

    assert_eq!(result.kind, ExecutionKind::Success);
    assert!(result.trace.is_none());
    let segments = sink.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].kind, SegmentKind::Input);
    assert_eq!(segments[0].text, ">>> x = 1");
}

#[test]
fn expression_value_is_printed() {
    let (ns, sink) = fresh();
    execution::execute("1 + 1", &ns, true, &sink).unwrap();

    assert_eq!(kinds(&sink), vec![SegmentKind::Input, SegmentKind::Output]);
    assert!(sink.segments()[1].text.contains('2'));
}

#[test]
fn raised_exception_becomes_error_segment() {
    let (ns, sink) = fresh();
    execution::execute("before = 1", &ns, false, &sink).unwrap();
    let result = execution::execute("raise ValueError('boom')", &ns, false, &sink).unwrap();

    assert_eq!(result.kind, ExecutionKind::RuntimeError);
    let errors: Vec<_> = sink
        .segments()
        .into_iter()
        .filter(|s| s.kind == SegmentKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].text.contains("ValueError"));
    assert!(errors[0].text.contains("boom"));
    assert!(matches!(ns.get("before"), Some(Value::Int(1))));
}

#[test]
fn malformed_source_is_a_syntax_error() {
    let (ns, sink) = fresh();
    let names_before = ns.names();
    let result = execution::execute("def f(:", &ns, false, &sink).unwrap();

    assert_eq!(result.kind, ExecutionKind::SyntaxError);
    assert!(result.is_error());
    assert_eq!(ns.names(), names_before);
    assert!(!ns.contains("f"));
    assert_eq!(kinds(&sink), vec![SegmentKind::Error]);
}

#[test]
fn echo_off_still_runs_the_code() {
    let (ns, sink) = fresh();
    execution::execute("y = 2", &ns, false, &sink).unwrap();

    assert!(sink.is_empty());
    assert!(matches!(ns.get("y"), Some(Value::Int(2))));
}

#[test]
fn blank_source_does_nothing() {
    let (ns, sink) = fresh();
    assert!(execution::execute("  \n\n", &ns, true, &sink).is_none());
    assert!(sink.is_empty());
}

#[test]
fn output_before_a_failure_is_kept() {
    let (ns, sink) = fresh();
    execution::execute("print('start')\n1 / 0", &ns, false, &sink).unwrap();

    assert_eq!(kinds(&sink), vec![SegmentKind::Output, SegmentKind::Error]);
    assert_eq!(sink.segments()[0].text, "start\n");
    assert!(sink.segments()[1].text.contains("ZeroDivisionError"));
}
