//! TUI application state management.

use std::collections::HashMap;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::execution::ExecutionKind;
use crate::session::TabId;

use super::editor;

/// What a text prompt popup does with its value once confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAction {
    /// Load a script into the current tab.
    Load,
    Save,
    /// Load a script into a new tab.
    Open,
    Rename,
}

impl PromptAction {
    pub fn title(self) -> &'static str {
        match self {
            PromptAction::Load => "Load script into this tab",
            PromptAction::Save => "Save input as",
            PromptAction::Open => "Open script in a new tab",
            PromptAction::Rename => "Rename tab",
        }
    }
}

/// Popup display state
#[derive(Debug, Clone, PartialEq)]
pub enum PopupState {
    None,
    Prompt {
        action: PromptAction,
        value: String,
    },
    /// A failure the user has to acknowledge.
    Message { title: String, text: String },
}

#[derive(Debug)]
pub struct App {
    /// Editor cursor (byte index) per tab
    pub cursors: HashMap<TabId, usize>,
    /// Where the selection started, per tab, while shift+arrows extend it
    pub anchors: HashMap<TabId, usize>,
    /// Status message to display
    pub status_message: String,
    /// Whether to show help
    pub show_help: bool,
    /// Lines scrolled up from the bottom of the output
    pub output_scroll_offset: usize,
    /// Popup display state
    pub popup_state: PopupState,
    /// Outcome of the latest execution, shown in the status bar
    pub last_result: Option<ExecutionKind>,
    /// Last path used by a load or save prompt
    pub last_path: Option<String>,
    /// Timestamp of last Ctrl+C press for double Ctrl+C detection
    pub last_ctrl_c_time: Option<Instant>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            cursors: HashMap::new(),
            anchors: HashMap::new(),
            status_message: "F5 execute | F1 help".to_string(),
            show_help: false,
            output_scroll_offset: 0,
            popup_state: PopupState::None,
            last_result: None,
            last_path: None,
            last_ctrl_c_time: None,
        }
    }

    /// Cursor for `tab`, clamped to `text`. New tabs start at the end.
    pub fn cursor(&mut self, tab: TabId, text: &str) -> &mut usize {
        let cursor = self.cursors.entry(tab).or_insert(text.len());
        *cursor = editor::clamp(text, *cursor);
        cursor
    }

    /// Selected byte range of `text` in `tab`, if any.
    pub fn selection(&self, tab: TabId, text: &str) -> Option<Range<usize>> {
        let cursor = self
            .cursors
            .get(&tab)
            .map_or(text.len(), |cursor| editor::clamp(text, *cursor));
        let anchor = self.anchors.get(&tab).map(|anchor| editor::clamp(text, *anchor));
        editor::selection(anchor, cursor)
    }

    /// Starts a selection at the cursor unless one is already open.
    pub fn extend_selection(&mut self, tab: TabId, text: &str) {
        let cursor = *self.cursor(tab, text);
        self.anchors.entry(tab).or_insert(cursor);
    }

    pub fn clear_selection(&mut self, tab: TabId) {
        self.anchors.remove(&tab);
    }

    pub fn select_all(&mut self, tab: TabId, text: &str) {
        self.anchors.insert(tab, 0);
        self.cursors.insert(tab, text.len());
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    /// Toggle help display
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.output_scroll_offset = self.output_scroll_offset.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.output_scroll_offset = self.output_scroll_offset.saturating_sub(lines);
    }

    /// Reset scroll to bottom
    pub fn scroll_to_bottom(&mut self) {
        self.output_scroll_offset = 0;
    }

    pub fn open_prompt(&mut self, action: PromptAction, value: String) {
        self.popup_state = PopupState::Prompt { action, value };
    }

    pub fn show_message(&mut self, title: impl Into<String>, text: impl Into<String>) {
        self.popup_state = PopupState::Message {
            title: title.into(),
            text: text.into(),
        };
    }

    /// Hide any popup
    pub fn hide_popup(&mut self) {
        self.popup_state = PopupState::None;
    }

    /// Check if any popup is shown
    pub fn is_popup_shown(&self) -> bool {
        self.popup_state != PopupState::None
    }

    /// Handle Ctrl+C press and detect double press for quit
    /// Returns true if should quit (double Ctrl+C), false otherwise
    pub fn handle_ctrl_c(&mut self) -> bool {
        const DOUBLE_CTRL_C_TIMEOUT: Duration = Duration::from_millis(500);

        let now = Instant::now();
        if let Some(last_time) = self.last_ctrl_c_time {
            if now.duration_since(last_time) <= DOUBLE_CTRL_C_TIMEOUT {
                self.last_ctrl_c_time = None;
                return true;
            }
        }

        self.last_ctrl_c_time = Some(now);
        self.set_status("Press Ctrl+C again to quit");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_ctrl_c_quits() {
        let mut app = App::new();
        assert!(!app.handle_ctrl_c());
        assert!(app.handle_ctrl_c());
        assert!(app.last_ctrl_c_time.is_none());
    }

    #[test]
    fn slow_ctrl_c_does_not_quit() {
        let mut app = App::new();
        app.last_ctrl_c_time = Instant::now().checked_sub(Duration::from_secs(2));
        assert!(!app.handle_ctrl_c());
    }

    #[test]
    fn scrolling_never_goes_below_the_bottom() {
        let mut app = App::new();
        app.scroll_up(10);
        app.scroll_down(4);
        assert_eq!(app.output_scroll_offset, 6);
        app.scroll_down(100);
        assert_eq!(app.output_scroll_offset, 0);
    }

    #[test]
    fn popups_open_and_close() {
        let mut app = App::new();
        app.open_prompt(PromptAction::Save, "out.py".into());
        assert!(app.is_popup_shown());
        app.hide_popup();
        assert!(!app.is_popup_shown());
        app.show_message("Load failed", "nope");
        assert!(matches!(app.popup_state, PopupState::Message { .. }));
    }

    #[test]
    fn shift_moves_grow_a_selection() {
        use crate::session::{HostBindings, SessionManager, TabDefaults};

        let tab = SessionManager::new(HostBindings::new(), TabDefaults::default()).active_tab();
        let text = "x = 1\ny = 2";
        let mut app = App::new();
        assert_eq!(app.selection(tab, text), None);

        app.extend_selection(tab, text);
        *app.cursor(tab, text) = 6;
        app.extend_selection(tab, text);
        assert_eq!(app.selection(tab, text), Some(6..11));

        app.clear_selection(tab);
        assert_eq!(app.selection(tab, text), None);
        app.select_all(tab, text);
        assert_eq!(app.selection(tab, text), Some(0..11));
        assert_eq!(app.selection(tab, "x"), Some(0..1));
    }
}
