//! Session/Tab Manager: one namespace and one output sink per tab.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::interp::builtins;
use crate::interp::{Namespace, Value};
use crate::output::{OutputSink, SegmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no such tab: {0}")]
    UnknownTab(TabId),
    #[error("failed to access tab state {path}: {source}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed tab state {path}: {source}")]
    SnapshotFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type BindingFactory = Rc<dyn Fn() -> Value>;

/// Names the embedding application injects into every new namespace. Each
/// entry is produced by a factory so a host can hand out per-tab values.
#[derive(Clone, Default)]
pub struct HostBindings {
    entries: IndexMap<String, BindingFactory>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to the same value in every tab.
    pub fn with_value(self, name: impl Into<String>, value: Value) -> Self {
        self.with_factory(name, move || value.clone())
    }

    pub fn with_factory(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Value + 'static,
    ) -> Self {
        self.entries.insert(name.into(), Rc::new(factory));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fills a fresh namespace: interpreter built-ins first, then the host
    /// entries, which may shadow them.
    pub fn seed(&self, namespace: &Namespace) {
        namespace.set("__builtins__", builtins::builtins_module());
        namespace.set("__name__", Value::str("__main__"));
        for (name, factory) in &self.entries {
            namespace.set(name.clone(), factory());
        }
    }
}

impl fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

/// Per-tab defaults applied when a tab is created.
#[derive(Debug, Clone)]
pub struct TabDefaults {
    pub echo: bool,
    pub line_numbers: bool,
    /// Written into every new tab's output.
    pub welcome: Option<String>,
}

impl Default for TabDefaults {
    fn default() -> Self {
        Self {
            echo: true,
            line_numbers: true,
            welcome: None,
        }
    }
}

#[derive(Debug)]
pub struct Tab {
    id: TabId,
    pub title: String,
    namespace: Namespace,
    sink: OutputSink,
    pub echo: bool,
    pub line_numbers: bool,
    pub input: String,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn output_text(&self) -> String {
        self.sink.text()
    }
}

impl Drop for Tab {
    fn drop(&mut self) {
        // Functions stored in the namespace hold it through their globals.
        self.namespace.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabState {
    pub title: String,
    pub contents: String,
}

/// What survives a restart: titles, input text, and the active index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub tabs: Vec<TabState>,
    pub current_tab: usize,
}

impl SessionSnapshot {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let text = fs::read_to_string(path).map_err(|source| SessionError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SessionError::SnapshotFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let io_error = |source| SessionError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| {
            SessionError::SnapshotFormat {
                path: path.to_path_buf(),
                source,
            }
        })?;
        fs::write(path, text).map_err(io_error)
    }
}

/// Owns every open tab. There is always at least one, and exactly one is
/// active.
#[derive(Debug)]
pub struct SessionManager {
    tabs: Vec<Tab>,
    active: usize,
    next_id: u64,
    bindings: HostBindings,
    defaults: TabDefaults,
}

impl SessionManager {
    pub fn new(bindings: HostBindings, defaults: TabDefaults) -> Self {
        let mut manager = Self::empty(bindings, defaults);
        manager.create_tab();
        manager
    }

    /// Rebuilds the tabs described by `snapshot`. Namespaces start fresh.
    pub fn restore(
        bindings: HostBindings,
        defaults: TabDefaults,
        snapshot: &SessionSnapshot,
    ) -> Self {
        let mut manager = Self::empty(bindings, defaults);
        for state in &snapshot.tabs {
            manager.create_tab_with(Some(&state.title), &state.contents);
        }
        if manager.tabs.is_empty() {
            manager.create_tab();
        }
        manager.active = snapshot.current_tab.min(manager.tabs.len() - 1);
        info!(tabs = manager.tabs.len(), active = manager.active, "restored tabs");
        manager
    }

    fn empty(bindings: HostBindings, defaults: TabDefaults) -> Self {
        Self {
            tabs: Vec::new(),
            active: 0,
            next_id: 1,
            bindings,
            defaults,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tabs: self
                .tabs
                .iter()
                .map(|tab| TabState {
                    title: tab.title.clone(),
                    contents: tab.input.clone(),
                })
                .collect(),
            current_tab: self.active,
        }
    }

    pub fn bindings(&self) -> &HostBindings {
        &self.bindings
    }

    /// Opens a default tab and makes it active.
    pub fn create_tab(&mut self) -> TabId {
        self.create_tab_with(None, "")
    }

    /// Opens a tab with preset input. Without a title the tab is numbered.
    pub fn create_tab_with(&mut self, title: Option<&str>, contents: &str) -> TabId {
        let id = TabId(self.next_id);
        self.next_id += 1;

        let namespace = Namespace::new();
        self.bindings.seed(&namespace);
        let sink = OutputSink::new();
        if let Some(welcome) = &self.defaults.welcome {
            sink.push(SegmentKind::Input, welcome.clone());
        }

        let title = match title {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => format!("Console {}", id.0),
        };
        debug!(%id, %title, "created tab");
        self.tabs.push(Tab {
            id,
            title,
            namespace,
            sink,
            echo: self.defaults.echo,
            line_numbers: self.defaults.line_numbers,
            input: contents.to_string(),
        });
        self.active = self.tabs.len() - 1;
        id
    }

    /// Closes a tab. Closing the last one opens a fresh default tab in its
    /// place.
    pub fn close_tab(&mut self, id: TabId) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        self.tabs.remove(index);
        debug!(%id, "closed tab");
        if self.tabs.is_empty() {
            self.create_tab();
            return Ok(());
        }
        if self.active > index || (self.active == index && index > 0) {
            self.active -= 1;
        }
        Ok(())
    }

    pub fn active_tab(&self) -> TabId {
        self.active().id
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn set_active(&mut self, id: TabId) -> Result<(), SessionError> {
        self.active = self.index_of(id)?;
        Ok(())
    }

    pub fn next_tab(&mut self) -> TabId {
        self.active = (self.active + 1) % self.tabs.len();
        self.active_tab()
    }

    pub fn previous_tab(&mut self) -> TabId {
        self.active = (self.active + self.tabs.len() - 1) % self.tabs.len();
        self.active_tab()
    }

    pub fn rename_tab(&mut self, id: TabId, title: &str) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        self.tabs[index].title = title.to_string();
        Ok(())
    }

    pub fn active(&self) -> &Tab {
        &self.tabs[self.active]
    }

    pub fn active_mut(&mut self) -> &mut Tab {
        &mut self.tabs[self.active]
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.id == id)
    }

    pub fn tab_mut(&mut self, id: TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|tab| tab.id == id)
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    fn index_of(&self, id: TabId) -> Result<usize, SessionError> {
        self.tabs
            .iter()
            .position(|tab| tab.id == id)
            .ok_or(SessionError::UnknownTab(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(
            HostBindings::new().with_value("engine", Value::str("engine")),
            TabDefaults::default(),
        )
    }

    #[test]
    fn starts_with_one_seeded_tab() {
        let sessions = manager();
        assert_eq!(sessions.len(), 1);
        let ns = sessions.active().namespace();
        assert!(ns.contains("__builtins__"));
        assert_eq!(ns.get("engine").map(|v| v.to_str()), Some("engine".to_string()));
        assert_eq!(sessions.active().title, "Console 1");
        assert!(sessions.active().echo);
    }

    #[test]
    fn new_tabs_become_active_and_close_moves_left() {
        let mut sessions = manager();
        let first = sessions.active_tab();
        let second = sessions.create_tab();
        let third = sessions.create_tab();
        assert_eq!(sessions.active_tab(), third);

        sessions.set_active(second).unwrap();
        sessions.close_tab(second).unwrap();
        assert_eq!(sessions.active_tab(), first);
        assert_eq!(sessions.len(), 2);

        sessions.set_active(third).unwrap();
        sessions.close_tab(first).unwrap();
        assert_eq!(sessions.active_tab(), third);
    }

    #[test]
    fn cycling_wraps_around() {
        let mut sessions = manager();
        let first = sessions.active_tab();
        let second = sessions.create_tab();
        assert_eq!(sessions.next_tab(), first);
        assert_eq!(sessions.previous_tab(), second);
        assert_eq!(sessions.previous_tab(), first);
    }

    #[test]
    fn unknown_tabs_are_reported() {
        let mut sessions = manager();
        let id = sessions.active_tab();
        sessions.close_tab(id).unwrap();
        assert!(matches!(
            sessions.rename_tab(id, "x"),
            Err(SessionError::UnknownTab(missing)) if missing == id
        ));
        assert!(sessions.tab(id).is_none());
    }

    #[test]
    fn welcome_text_is_written_to_each_tab() {
        let defaults = TabDefaults {
            welcome: Some("hello\n".to_string()),
            ..TabDefaults::default()
        };
        let mut sessions = SessionManager::new(HostBindings::new(), defaults);
        sessions.create_tab();
        for tab in sessions.tabs() {
            assert_eq!(tab.output_text(), "hello\n");
        }
    }

    #[test]
    fn restore_clamps_the_active_index() {
        let snapshot = SessionSnapshot {
            tabs: vec![TabState {
                title: "scratch".into(),
                contents: "x = 1".into(),
            }],
            current_tab: 4,
        };
        let sessions =
            SessionManager::restore(HostBindings::new(), TabDefaults::default(), &snapshot);
        assert_eq!(sessions.active_index(), 0);
        assert_eq!(sessions.active().title, "scratch");
        assert_eq!(sessions.active().input, "x = 1");
        assert_eq!(sessions.snapshot(), SessionSnapshot { current_tab: 0, ..snapshot });
    }
}
