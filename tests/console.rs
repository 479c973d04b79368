use std::fs;

use dcc_console::console::{ConsoleController, ConsoleError, ControllerOptions, LoadError, SaveError};
use dcc_console::execution::ExecutionKind;
use dcc_console::session::{HostBindings, SessionManager, TabDefaults};

fn controller() -> ConsoleController {
    ConsoleController::new(
        SessionManager::new(HostBindings::new(), TabDefaults::default()),
        ControllerOptions::default(),
    )
}

#[test]
fn save_then_load_round_trips_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.py");
    let source = "def greet(name):\n    return 'hi ' + name\n\nprint(greet('ünï'))\n";

    let mut console = controller();
    console.sessions_mut().active_mut().input = source.to_string();
    console.save_file(&path).unwrap();

    console.clear_input();
    assert!(console.sessions().active().input.is_empty());

    console.load_file(&path).unwrap();
    assert_eq!(console.sessions().active().input, source);
    assert_eq!(fs::read_to_string(&path).unwrap(), source);
}

#[test]
fn loading_a_missing_file_keeps_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut console = controller();
    console.sessions_mut().active_mut().input = "x = 1".into();

    let err = console.load_file(&dir.path().join("missing.py")).unwrap_err();
    assert!(matches!(err, LoadError::Read { .. }));
    assert_eq!(console.sessions().active().input, "x = 1");
}

#[test]
fn execute_keeps_the_input_and_appends_output() {
    let mut console = controller();
    console.sessions_mut().active_mut().input = "print('hello')".into();

    let result = console.execute().unwrap().unwrap();
    assert_eq!(result.kind, ExecutionKind::Success);
    assert_eq!(console.sessions().active().input, "print('hello')");
    assert!(console.sessions().active().output_text().ends_with("hello\n"));
}

#[test]
fn toggled_echo_applies_to_the_next_run() {
    let mut console = controller();
    assert!(!console.toggle_echo());
    console.execute_source("y = 2").unwrap();

    let tab = console.sessions().active();
    assert!(tab.sink().is_empty());
    assert!(tab.namespace().contains("y"));
}

#[test]
fn busy_controller_refuses_to_execute() {
    let mut console = controller();
    console.busy_flag().set(true);
    assert!(matches!(console.execute_source("1"), Err(ConsoleError::Busy)));
}

#[test]
fn failed_save_leaves_the_existing_target_alone() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be replaced by the renamed temp file.
    let target = dir.path().join("script.py");
    fs::create_dir(&target).unwrap();
    fs::write(target.join("keep.txt"), b"original bytes").unwrap();
    let sibling = dir.path().join("other.py");
    fs::write(&sibling, "x = 1\n").unwrap();

    let mut console = controller();
    console.sessions_mut().active_mut().input = "print('new')\n".into();
    let err = console.save_file(&target).unwrap_err();
    assert!(
        matches!(err, SaveError::Persist { .. } | SaveError::Write { .. }),
        "{}",
        err
    );

    assert!(target.is_dir());
    assert_eq!(fs::read(target.join("keep.txt")).unwrap(), b"original bytes");
    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["other.py", "script.py"]);
    assert_eq!(fs::read_to_string(&sibling).unwrap(), "x = 1\n");

    console.save_file(&sibling).unwrap();
    assert_eq!(fs::read_to_string(&sibling).unwrap(), "print('new')\n");
}

#[test]
fn selected_text_runs_on_its_own() {
    let mut console = controller();
    console.sessions_mut().active_mut().input = "first = 1\nsecond = 2\n".into();

    let result = console.execute_selection(Some(10..20)).unwrap().unwrap();
    assert_eq!(result.kind, ExecutionKind::Success);
    let tab = console.sessions().active();
    assert!(tab.namespace().contains("second"));
    assert!(!tab.namespace().contains("first"));

    console.execute_selection(None).unwrap();
    assert!(console.sessions().active().namespace().contains("first"));
}
