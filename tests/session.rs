use dcc_console::interp::Value;
use dcc_console::session::{HostBindings, SessionManager, SessionSnapshot, TabDefaults};

fn manager() -> SessionManager {
    let bindings = HostBindings::new().with_value("answer", Value::Int(42));
    SessionManager::new(bindings, TabDefaults::default())
}

#[test]
fn closing_the_only_tab_leaves_a_fresh_one() {
    let mut sessions = manager();
    let first = sessions.active_tab();
    sessions.active().namespace().set("leftover", Value::Int(1));

    sessions.close_tab(first).unwrap();

    assert_eq!(sessions.len(), 1);
    let tab = sessions.active();
    assert_ne!(tab.id(), first);
    assert!(!tab.namespace().contains("leftover"));
    assert!(matches!(tab.namespace().get("answer"), Some(Value::Int(42))));
}

#[test]
fn tabs_do_not_share_namespaces() {
    let mut sessions = manager();
    let first = sessions.active_tab();
    sessions.active().namespace().set("x", Value::Int(1));
    sessions.create_tab();

    assert!(!sessions.active().namespace().contains("x"));
    assert!(sessions.tab(first).unwrap().namespace().contains("x"));
}

#[test]
fn snapshot_restores_titles_and_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("tabs.json");

    let mut sessions = manager();
    sessions.active_mut().input = "print('one')".into();
    let second = sessions.create_tab_with(Some("Scratch"), "x = 2");
    sessions.set_active(second).unwrap();
    sessions.snapshot().save(&path).unwrap();

    let snapshot = SessionSnapshot::load(&path).unwrap();
    let restored = SessionManager::restore(HostBindings::new(), TabDefaults::default(), &snapshot);

    assert_eq!(restored.len(), 2);
    assert_eq!(restored.active_index(), 1);
    assert_eq!(restored.active().title, "Scratch");
    assert_eq!(restored.active().input, "x = 2");
    assert_eq!(restored.tabs()[0].input, "print('one')");
}

#[test]
fn closing_a_tab_releases_deeply_nested_values() {
    let mut sessions = manager();
    let first = sessions.active_tab();
    let mut nested = Value::list(Vec::new());
    for _ in 0..200_000 {
        nested = Value::tuple(vec![Value::list(vec![nested])]);
    }
    sessions.active().namespace().set("nested", nested);

    sessions.close_tab(first).unwrap();

    assert_eq!(sessions.len(), 1);
    assert!(!sessions.active().namespace().contains("nested"));
}
