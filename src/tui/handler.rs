//! Async event handler for the console panel.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::style::{Color as TermColor, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, ClearType, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{cursor, queue, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use super::{
    app::{App, PopupState, PromptAction},
    editor,
    events::TuiEvent,
    ui::render_ui,
};
use crate::console::ConsoleController;
use crate::redirect::{self, LineReader};

type Term = Terminal<CrosstermBackend<io::Stdout>>;
type SharedEvents = Arc<Mutex<mpsc::UnboundedReceiver<TuiEvent>>>;

/// Run the console panel until the user quits. The tab layout is written to
/// `state_path` on the way out.
pub async fn run_tui_repl(mut console: ConsoleController, state_path: Option<PathBuf>) -> Result<()> {
    // Check if we're in a proper terminal environment
    if !io::IsTerminal::is_terminal(&io::stdout()) {
        return Err(anyhow!("the console panel requires a terminal"));
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    stdout.execute(EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Create event channels
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TuiEvent>();
    let events: SharedEvents = Arc::new(Mutex::new(event_rx));
    let running = Arc::new(AtomicBool::new(true));
    spawn_event_poller(event_tx, running.clone());

    console.set_reader(Some(redirect::shared_reader(StatusLineReader {
        events: events.clone(),
    })));

    let mut app = App::new();
    let result = run_app(&mut terminal, &mut app, &mut console, &events).await;

    running.store(false, Ordering::Relaxed);
    console.set_reader(None);

    // Restore terminal
    disable_raw_mode()?;
    terminal.backend_mut().execute(DisableBracketedPaste)?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(path) = state_path {
        match console.sessions().snapshot().save(&path) {
            Ok(()) => info!(path = %path.display(), "saved tab layout"),
            Err(e) => warn!("could not save tab layout: {}", e),
        }
    }

    result
}

fn spawn_event_poller(tx: mpsc::UnboundedSender<TuiEvent>, running: Arc<AtomicBool>) {
    tokio::task::spawn_blocking(move || {
        while running.load(Ordering::Relaxed) {
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            let forwarded = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => TuiEvent::Key(key),
                Ok(Event::Paste(text)) => TuiEvent::Paste(text),
                Ok(Event::Resize(..)) => TuiEvent::Resize,
                _ => continue,
            };
            if tx.send(forwarded).is_err() {
                break; // Channel closed
            }
        }
    });
}

/// Main application loop
async fn run_app(
    terminal: &mut Term,
    app: &mut App,
    console: &mut ConsoleController,
    events: &SharedEvents,
) -> Result<()> {
    loop {
        terminal.draw(|frame| render_ui(frame, app, console))?;

        let next = events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv();
        match next {
            Ok(TuiEvent::Key(key)) => {
                if handle_key_event(terminal, app, console, key)? {
                    break;
                }
            }
            Ok(TuiEvent::Paste(text)) => handle_paste(app, console, &text),
            Ok(TuiEvent::Resize) => {}
            Err(TryRecvError::Empty) => {
                tokio::time::sleep(Duration::from_millis(16)).await; // ~60 FPS
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }

    Ok(())
}

/// Applies `edit` to the active tab's input at its cursor. Typing over a
/// selection replaces it.
fn edit_input(app: &mut App, console: &mut ConsoleController, edit: impl FnOnce(&mut String, &mut usize)) {
    let tab = console.sessions_mut().active_mut();
    let id = tab.id();
    let selected = app.selection(id, &tab.input);
    app.clear_selection(id);
    let cursor = app.cursor(id, &tab.input);
    if let Some(range) = selected {
        editor::delete_selection(&mut tab.input, cursor, range);
    }
    edit(&mut tab.input, cursor);
}

/// Backspace and Delete remove the selection when there is one.
fn erase(app: &mut App, console: &mut ConsoleController, edit: impl FnOnce(&mut String, &mut usize)) {
    let tab = console.sessions_mut().active_mut();
    let id = tab.id();
    let selected = app.selection(id, &tab.input);
    app.clear_selection(id);
    let cursor = app.cursor(id, &tab.input);
    match selected {
        Some(range) => editor::delete_selection(&mut tab.input, cursor, range),
        None => edit(&mut tab.input, cursor),
    }
}

/// Moves the cursor. With shift held the selection follows it, otherwise
/// the selection is dropped.
fn move_cursor(app: &mut App, console: &ConsoleController, extend: bool, motion: fn(&str, &mut usize)) {
    let tab = console.sessions().active();
    if extend {
        app.extend_selection(tab.id(), &tab.input);
    } else {
        app.clear_selection(tab.id());
    }
    motion(&tab.input, app.cursor(tab.id(), &tab.input));
}

fn handle_paste(app: &mut App, console: &mut ConsoleController, text: &str) {
    if let PopupState::Prompt { value, .. } = &mut app.popup_state {
        value.push_str(text.lines().next().unwrap_or_default());
        return;
    }
    if app.is_popup_shown() {
        return;
    }
    edit_input(app, console, |input, cursor| {
        editor::insert_str(input, cursor, text)
    });
}

/// Handle keyboard events. Returns true when the user asked to quit.
fn handle_key_event(
    terminal: &mut Term,
    app: &mut App,
    console: &mut ConsoleController,
    key: KeyEvent,
) -> Result<bool> {
    if app.is_popup_shown() {
        handle_popup_key(app, console, key);
        return Ok(false);
    }
    if app.show_help {
        app.toggle_help();
        return Ok(false);
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let page = usize::from(terminal.size()?.height / 2).max(1);

    match key.code {
        KeyCode::Char('c') if ctrl => return Ok(app.handle_ctrl_c()),
        KeyCode::Char('q') if ctrl => return Ok(true),
        KeyCode::F(1) => app.toggle_help(),
        KeyCode::F(5) => execute(terminal, app, console)?,
        KeyCode::Char('e') if ctrl => execute(terminal, app, console)?,
        KeyCode::Char('t') if ctrl => {
            console.new_tab();
            app.set_status("New tab");
        }
        KeyCode::Char('w') if ctrl => {
            let closed = console.sessions().active_tab();
            console.close_active_tab()?;
            app.cursors.remove(&closed);
            app.anchors.remove(&closed);
            app.set_status("Closed tab");
        }
        KeyCode::F(7) => {
            console.sessions_mut().previous_tab();
            app.scroll_to_bottom();
        }
        KeyCode::F(8) => {
            console.sessions_mut().next_tab();
            app.scroll_to_bottom();
        }
        KeyCode::F(6) => {
            let title = console.sessions().active().title.clone();
            app.open_prompt(PromptAction::Rename, title);
        }
        KeyCode::Char('l') if ctrl => {
            console.clear_output();
            app.scroll_to_bottom();
        }
        KeyCode::Char('k') if ctrl => {
            app.clear_selection(console.sessions().active_tab());
            console.clear_input();
        }
        KeyCode::Char('a') if ctrl => {
            let tab = console.sessions().active();
            app.select_all(tab.id(), &tab.input);
        }
        KeyCode::Char('o') if ctrl => {
            app.open_prompt(PromptAction::Load, app.last_path.clone().unwrap_or_default())
        }
        KeyCode::F(4) => {
            app.open_prompt(PromptAction::Open, app.last_path.clone().unwrap_or_default())
        }
        KeyCode::Char('s') if ctrl => {
            app.open_prompt(PromptAction::Save, app.last_path.clone().unwrap_or_default())
        }
        KeyCode::F(2) => {
            let echo = console.toggle_echo();
            app.set_status(if echo { "Echo on" } else { "Echo off" });
        }
        KeyCode::F(3) => {
            console.toggle_line_numbers();
        }
        KeyCode::PageUp => app.scroll_up(page),
        KeyCode::PageDown => app.scroll_down(page),
        KeyCode::Enter => edit_input(app, console, editor::insert_newline),
        KeyCode::Tab => edit_input(app, console, editor::insert_indent),
        KeyCode::Backspace => erase(app, console, editor::backspace),
        KeyCode::Delete => erase(app, console, editor::delete),
        KeyCode::Left => move_cursor(app, console, shift, editor::move_left),
        KeyCode::Right => move_cursor(app, console, shift, editor::move_right),
        KeyCode::Up => move_cursor(app, console, shift, editor::move_up),
        KeyCode::Down => move_cursor(app, console, shift, editor::move_down),
        KeyCode::Home => move_cursor(app, console, shift, editor::move_home),
        KeyCode::End => move_cursor(app, console, shift, editor::move_end),
        KeyCode::Char(c) if !ctrl => {
            edit_input(app, console, |text, cursor| editor::insert_char(text, cursor, c))
        }
        _ => {}
    }

    Ok(false)
}

fn execute(terminal: &mut Term, app: &mut App, console: &mut ConsoleController) -> Result<()> {
    app.set_status("Running...");
    terminal.draw(|frame| render_ui(frame, app, console))?;

    let tab = console.sessions().active();
    let selection = app.selection(tab.id(), &tab.input);
    let status = if selection.is_some() { "Executed selection" } else { "Executed" };
    match console.execute_selection(selection) {
        Ok(Some(result)) => {
            app.last_result = Some(result.kind);
            app.set_status(status);
        }
        Ok(None) => app.set_status("Nothing to execute"),
        Err(e) => app.show_message("Execute", e.to_string()),
    }
    app.scroll_to_bottom();
    // input() prompts draw behind ratatui's back.
    terminal.clear()?;
    Ok(())
}

fn handle_popup_key(app: &mut App, console: &mut ConsoleController, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let PopupState::Prompt { action, value } = &mut app.popup_state else {
        app.hide_popup();
        return;
    };
    match key.code {
        KeyCode::Esc => app.hide_popup(),
        KeyCode::Enter => {
            let action = *action;
            let value = value.trim().to_string();
            app.hide_popup();
            apply_prompt(app, console, action, value);
        }
        KeyCode::Backspace => {
            value.pop();
        }
        KeyCode::Char(c) if !ctrl => value.push(c),
        _ => {}
    }
}

fn apply_prompt(app: &mut App, console: &mut ConsoleController, action: PromptAction, value: String) {
    if value.is_empty() {
        return;
    }
    let path = Path::new(&value);
    match action {
        PromptAction::Rename => {
            let id = console.sessions().active_tab();
            if let Err(e) = console.sessions_mut().rename_tab(id, &value) {
                app.show_message("Rename failed", e.to_string());
            }
            return;
        }
        PromptAction::Load => match console.load_file(path) {
            Ok(()) => {
                let id = console.sessions().active_tab();
                app.cursors.insert(id, 0);
                app.clear_selection(id);
                app.set_status(format!("Loaded {}", value));
            }
            Err(e) => app.show_message("Load failed", e.to_string()),
        },
        PromptAction::Open => match console.open_file_in_new_tab(path) {
            Ok(_) => app.set_status(format!("Opened {}", value)),
            Err(e) => app.show_message("Open failed", e.to_string()),
        },
        PromptAction::Save => match console.save_file(path) {
            Ok(()) => app.set_status(format!("Saved {}", value)),
            Err(e) => app.show_message("Save failed", e.to_string()),
        },
    }
    debug!(?action, path = %value, "file action");
    app.last_path = Some(value);
}

/// Answers `input()` from the status line while an execution is running.
/// The panel loop is blocked inside the execution, so keys are taken from
/// the event channel here.
struct StatusLineReader {
    events: SharedEvents,
}

impl StatusLineReader {
    fn draw(prompt: &str, line: &str) -> io::Result<()> {
        let (_, rows) = terminal::size()?;
        let mut out = io::stdout();
        queue!(
            out,
            cursor::MoveTo(0, rows.saturating_sub(1)),
            terminal::Clear(ClearType::CurrentLine),
            SetForegroundColor(TermColor::Yellow),
            Print("input> "),
            ResetColor,
            Print(prompt),
            Print(line),
            cursor::Show
        )?;
        out.flush()
    }
}

impl LineReader for StatusLineReader {
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut line = String::new();
        let mut dirty = true;
        loop {
            if dirty {
                Self::draw(prompt, &line)?;
                dirty = false;
            }
            let next = self
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_recv();
            match next {
                Ok(TuiEvent::Key(key)) => {
                    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
                    match key.code {
                        KeyCode::Enter => {
                            line.push('\n');
                            return Ok(Some(line));
                        }
                        KeyCode::Esc => return Ok(None),
                        KeyCode::Char('c' | 'd') if ctrl => return Ok(None),
                        KeyCode::Backspace => {
                            line.pop();
                        }
                        KeyCode::Char(c) if !ctrl => line.push(c),
                        _ => {}
                    }
                    dirty = true;
                }
                Ok(TuiEvent::Paste(text)) => {
                    line.push_str(text.lines().next().unwrap_or_default());
                    dirty = true;
                }
                Ok(TuiEvent::Resize) => dirty = true,
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(16)),
                Err(TryRecvError::Disconnected) => return Ok(None),
            }
        }
    }
}
