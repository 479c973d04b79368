//! Console Controller: the user-facing actions, applied to the active tab.

use std::cell::Cell;
use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::execution::{self, ExecutionOptions, ExecutionResult};
use crate::interp::DEFAULT_RECURSION_LIMIT;
use crate::redirect::SharedReader;
use crate::session::{SessionError, SessionManager, TabId};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a UTF-8 text file", path.display())]
    NotText { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("directory {} does not exist", path.display())]
    MissingParent { path: PathBuf },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to replace {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("an execution is already running")]
    Busy,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Save(#[from] SaveError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Settings that apply to every execution regardless of tab.
#[derive(Clone, Default)]
pub struct ControllerOptions {
    pub tee: bool,
    pub recursion_limit: Option<usize>,
    /// Line source for `input()`; the real stdin when unset.
    pub reader: Option<SharedReader>,
}

pub struct ConsoleController {
    sessions: SessionManager,
    options: ControllerOptions,
    busy: Rc<Cell<bool>>,
}

struct BusyGuard(Rc<Cell<bool>>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ConsoleController {
    pub fn new(sessions: SessionManager, options: ControllerOptions) -> Self {
        Self {
            sessions,
            options,
            busy: Rc::new(Cell::new(false)),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    pub fn set_reader(&mut self, reader: Option<SharedReader>) {
        self.options.reader = reader;
    }

    /// Shared view of the in-flight flag, for callers that need to grey out
    /// execute while a run is going.
    pub fn busy_flag(&self) -> Rc<Cell<bool>> {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Runs the active tab's input. The input is left in place. `Ok(None)`
    /// means the input was blank.
    pub fn execute(&mut self) -> Result<Option<ExecutionResult>, ConsoleError> {
        self.execute_selection(None)
    }

    /// Runs the selected byte range of the active input. An empty or missing
    /// selection runs the whole input, as does a range that does not fall on
    /// character boundaries.
    pub fn execute_selection(
        &mut self,
        selection: Option<Range<usize>>,
    ) -> Result<Option<ExecutionResult>, ConsoleError> {
        if self.busy.replace(true) {
            return Err(ConsoleError::Busy);
        }
        let _busy = BusyGuard(self.busy.clone());

        let tab = self.sessions.active();
        let options = ExecutionOptions {
            echo: tab.echo,
            tee: self.options.tee,
            recursion_limit: self
                .options
                .recursion_limit
                .unwrap_or(DEFAULT_RECURSION_LIMIT),
            reader: self.options.reader.clone(),
        };
        let source = match selection.and_then(|range| tab.input.get(range)) {
            Some(selected) if !selected.is_empty() => selected,
            _ => tab.input.as_str(),
        };
        debug!(tab = %tab.id(), selected = source.len() < tab.input.len(), "execute");
        let result = execution::execute_with(source, tab.namespace(), tab.sink(), &options);
        if let Some(result) = &result {
            debug!(tab = %tab.id(), kind = ?result.kind, "execution finished");
        }
        Ok(result)
    }

    /// Replaces the active input and runs it.
    pub fn execute_source(
        &mut self,
        source: &str,
    ) -> Result<Option<ExecutionResult>, ConsoleError> {
        self.sessions.active_mut().input = source.to_string();
        self.execute()
    }

    pub fn clear_input(&mut self) {
        self.sessions.active_mut().input.clear();
    }

    pub fn clear_output(&mut self) {
        self.sessions.active().sink().clear();
    }

    /// Replaces the active input with the file's contents. On failure the
    /// input is untouched.
    pub fn load_file(&mut self, path: &Path) -> Result<(), LoadError> {
        let text = read_text(path)?;
        info!(path = %path.display(), "loaded script");
        self.sessions.active_mut().input = text;
        Ok(())
    }

    /// Loads a file into a new tab titled after it.
    pub fn open_file_in_new_tab(&mut self, path: &Path) -> Result<TabId, LoadError> {
        let text = read_text(path)?;
        let title = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(self.sessions.create_tab_with(title.as_deref(), &text))
    }

    /// Writes the active input to `path` through a temporary file in the
    /// same directory, so a failed save leaves the target as it was.
    pub fn save_file(&self, path: &Path) -> Result<(), SaveError> {
        write_atomic(path, &self.sessions.active().input)?;
        info!(path = %path.display(), "saved script");
        Ok(())
    }

    pub fn toggle_echo(&mut self) -> bool {
        let tab = self.sessions.active_mut();
        tab.echo = !tab.echo;
        tab.echo
    }

    pub fn toggle_line_numbers(&mut self) -> bool {
        let tab = self.sessions.active_mut();
        tab.line_numbers = !tab.line_numbers;
        tab.line_numbers
    }

    pub fn new_tab(&mut self) -> TabId {
        self.sessions.create_tab()
    }

    pub fn close_active_tab(&mut self) -> Result<(), ConsoleError> {
        let id = self.sessions.active_tab();
        self.sessions.close_tab(id)?;
        Ok(())
    }
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    let bytes = fs::read(path).map_err(|source| {
        warn!(path = %path.display(), "load failed: {}", source);
        LoadError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    String::from_utf8(bytes).map_err(|_| LoadError::NotText {
        path: path.to_path_buf(),
    })
}

fn write_atomic(path: &Path, text: &str) -> Result<(), SaveError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(SaveError::MissingParent {
            path: parent.to_path_buf(),
        });
    }
    let write_error = |source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = NamedTempFile::new_in(parent).map_err(write_error)?;
    file.write_all(text.as_bytes()).map_err(write_error)?;
    file.as_file().sync_all().map_err(write_error)?;
    file.persist(path).map_err(|e| SaveError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SegmentKind;
    use crate::session::{HostBindings, TabDefaults};

    fn controller() -> ConsoleController {
        ConsoleController::new(
            SessionManager::new(HostBindings::new(), TabDefaults::default()),
            ControllerOptions::default(),
        )
    }

    #[test]
    fn execute_keeps_the_input() {
        let mut console = controller();
        let result = console.execute_source("a = 5").unwrap();
        assert!(result.is_some());
        assert_eq!(console.sessions().active().input, "a = 5");
        assert!(!console.is_busy());
    }

    #[test]
    fn selection_runs_only_the_selected_lines() {
        let mut console = controller();
        console.sessions_mut().active_mut().input = "a = 1\nif a:\n    b = a + 1\n".into();

        let start = "a = 1\nif a:\n".len();
        let end = console.sessions().active().input.len();
        console.execute_selection(Some(start..end)).unwrap();
        let ns = console.sessions().active().namespace();
        assert!(ns.get("b").is_none());
        assert_eq!(
            console.sessions().active().sink().segments().last().map(|s| s.kind),
            Some(SegmentKind::Error)
        );

        console.execute_selection(Some(0..5)).unwrap();
        console.execute_selection(Some(start..end)).unwrap();
        let ns = console.sessions().active().namespace();
        assert_eq!(ns.get("b").map(|v| v.repr()), Some("2".to_string()));
        assert_eq!(console.sessions().active().input, "a = 1\nif a:\n    b = a + 1\n");
    }

    #[test]
    fn empty_selection_runs_everything() {
        let mut console = controller();
        console.sessions_mut().active_mut().input = "x = 3\ny = x * 2".into();
        console.execute_selection(Some(4..4)).unwrap();
        let ns = console.sessions().active().namespace();
        assert_eq!(ns.get("y").map(|v| v.repr()), Some("6".to_string()));

        console.sessions_mut().active_mut().input = "z = 'ñ'".into();
        console.execute_selection(Some(0..6)).unwrap();
        let ns = console.sessions().active().namespace();
        assert_eq!(ns.get("z").map(|v| v.repr()), Some("'ñ'".to_string()));
    }

    #[test]
    fn blank_input_runs_nothing() {
        let mut console = controller();
        assert!(console.execute_source("   \n").unwrap().is_none());
        assert!(console.sessions().active().sink().is_empty());
    }

    #[test]
    fn busy_flag_rejects_reentry() {
        let mut console = controller();
        console.busy_flag().set(true);
        assert!(matches!(console.execute(), Err(ConsoleError::Busy)));
        console.busy_flag().set(false);
        assert!(console.execute().is_ok());
    }

    #[test]
    fn toggles_flip_per_tab_flags() {
        let mut console = controller();
        assert!(!console.toggle_echo());
        assert!(!console.toggle_line_numbers());
        console.new_tab();
        assert!(console.sessions().active().echo);
        assert!(!console.toggle_echo());
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let console = controller();
        let target = dir.path().join("nope").join("script.py");
        assert!(matches!(
            console.save_file(&target),
            Err(SaveError::MissingParent { .. })
        ));
        assert!(!target.exists());
    }

    #[test]
    fn non_utf8_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.py");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let mut console = controller();
        console.sessions_mut().active_mut().input = "keep".to_string();
        assert!(matches!(
            console.load_file(&path),
            Err(LoadError::NotText { .. })
        ));
        assert_eq!(console.sessions().active().input, "keep");
    }
}
