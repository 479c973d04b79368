//! UI layout and rendering logic for the TUI.

use std::ops::Range;

use ratatui::{
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Tabs, Wrap},
    Frame,
};

use super::app::{App, PopupState};
use super::editor;
use crate::console::ConsoleController;
use crate::execution::ExecutionKind;
use crate::output::{Segment, SegmentKind};

/// Render the main UI
pub fn render_ui(frame: &mut Frame, app: &mut App, console: &ConsoleController) {
    let sessions = console.sessions();
    let tab = sessions.active();

    let input_lines = tab.input.split('\n').count().min(u16::MAX as usize) as u16;
    let max_input = (frame.area().height / 2).max(5);
    let input_height = input_lines.saturating_add(2).clamp(5, max_input);

    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),            // Tab bar
            Constraint::Min(3),               // Output area
            Constraint::Length(input_height), // Input area
            Constraint::Length(1),            // Status bar
        ])
        .split(frame.area());

    let titles: Vec<Line> = sessions
        .tabs()
        .iter()
        .map(|t| Line::from(format!(" {} ", t.title)))
        .collect();
    let tabs = Tabs::new(titles)
        .select(sessions.active_index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .divider("|");
    frame.render_widget(tabs, main_layout[0]);

    render_output_area(frame, app, &tab.sink().segments(), main_layout[1]);

    let cursor = *app.cursor(tab.id(), &tab.input);
    let lines = self::input_lines(&tab.input, app.selection(tab.id(), &tab.input), tab.line_numbers);
    render_input_area(frame, lines, &tab.input, cursor, tab.line_numbers, main_layout[2]);

    render_status_bar(frame, app, console, main_layout[3]);

    if app.show_help {
        render_help_overlay(frame);
    }

    match &app.popup_state {
        PopupState::Prompt { action, value } => render_prompt_popup(frame, action.title(), value),
        PopupState::Message { title, text } => render_message_popup(frame, title, text),
        PopupState::None => {}
    }
}

fn segment_style(kind: SegmentKind) -> Style {
    match kind {
        SegmentKind::Input => Style::default().fg(Color::Green),
        SegmentKind::Output => Style::default(),
        SegmentKind::Error => Style::default().fg(Color::Red),
    }
}

/// Splits segments into styled display lines. Stream output may end a line
/// inside one segment and continue it in the next.
pub fn output_lines(segments: &[Segment]) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();

    for segment in segments {
        let style = segment_style(segment.kind);
        let mut parts = segment.text.split('\n').peekable();
        while let Some(part) = parts.next() {
            if !part.is_empty() {
                current.push(Span::styled(part.to_string(), style));
            }
            if parts.peek().is_some() {
                lines.push(Line::from(std::mem::take(&mut current)));
            }
        }
        if segment.kind == SegmentKind::Input && !segment.text.ends_with('\n') {
            lines.push(Line::from(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        lines.push(Line::from(current));
    }
    lines
}

/// Render the output log
fn render_output_area(frame: &mut Frame, app: &mut App, segments: &[Segment], area: Rect) {
    let content_lines = output_lines(segments);

    let available_height = area.height.saturating_sub(2) as usize; // Account for borders
    let total_lines = content_lines.len();
    let max_scroll = total_lines.saturating_sub(available_height);
    app.output_scroll_offset = app.output_scroll_offset.min(max_scroll);

    let title = if app.output_scroll_offset > 0 {
        format!("Output (scrolled {} lines)", app.output_scroll_offset)
    } else {
        "Output".to_string()
    };

    // When the offset is 0 the bottom is shown.
    let scroll_y = (max_scroll - app.output_scroll_offset) as u16;
    let paragraph = Paragraph::new(Text::from(content_lines))
        .block(Block::default().borders(Borders::ALL).title(title))
        .scroll((scroll_y, 0));

    frame.render_widget(paragraph, area);
}

fn gutter_width(input: &str, line_numbers: bool) -> usize {
    if line_numbers {
        input.split('\n').count().to_string().len() + 1
    } else {
        0
    }
}

/// Editor lines with an optional line-number gutter. The selected byte
/// range is drawn reversed.
pub fn input_lines(input: &str, selection: Option<Range<usize>>, line_numbers: bool) -> Vec<Line<'static>> {
    let gutter_width = gutter_width(input, line_numbers);
    let gutter_style = Style::default().fg(Color::DarkGray);
    let selected_style = Style::default().add_modifier(Modifier::REVERSED);

    let mut start = 0;
    input
        .split('\n')
        .enumerate()
        .map(|(i, text)| {
            let mut spans = Vec::new();
            if line_numbers {
                spans.push(Span::styled(
                    format!("{:>width$} ", i + 1, width = gutter_width - 1),
                    gutter_style,
                ));
            }
            let end = start + text.len();
            match &selection {
                Some(range) if range.start <= end && range.end > start => {
                    let from = range.start.max(start) - start;
                    let to = range.end.min(end) - start;
                    spans.push(Span::raw(text[..from].to_string()));
                    // The newline itself is selected: show it as a trailing cell.
                    let marked = if range.end > end {
                        format!("{} ", &text[from..to])
                    } else {
                        text[from..to].to_string()
                    };
                    spans.push(Span::styled(marked, selected_style));
                    spans.push(Span::raw(text[to..].to_string()));
                }
                _ => spans.push(Span::raw(text.to_string())),
            }
            start = end + 1;
            Line::from(spans)
        })
        .collect()
}

/// Render the input editor
fn render_input_area(
    frame: &mut Frame,
    lines: Vec<Line<'static>>,
    input: &str,
    cursor: usize,
    line_numbers: bool,
    area: Rect,
) {
    let gutter_width = gutter_width(input, line_numbers);

    let (row, col) = editor::line_col(input, cursor);
    let inner_height = area.height.saturating_sub(2) as usize;
    let scroll_y = (row + 1).saturating_sub(inner_height);
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_x = (gutter_width + col + 1).saturating_sub(inner_width);

    let paragraph = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).title("Input"))
        .scroll((scroll_y as u16, scroll_x as u16));
    frame.render_widget(paragraph, area);

    frame.set_cursor_position(Position::new(
        area.x + 1 + (gutter_width + col).saturating_sub(scroll_x) as u16,
        area.y + 1 + row.saturating_sub(scroll_y) as u16,
    ));
}

/// Render the status bar
fn render_status_bar(frame: &mut Frame, app: &App, console: &ConsoleController, area: Rect) {
    let sessions = console.sessions();
    let tab = sessions.active();
    let on_off = |flag: bool| if flag { "on" } else { "off" };
    let result = match app.last_result {
        Some(ExecutionKind::Success) => " | ok",
        Some(ExecutionKind::SyntaxError) => " | syntax error",
        Some(ExecutionKind::RuntimeError) => " | error",
        None => "",
    };
    let status_text = format!(
        "{} | tab {}/{} | echo {} | lines {}{}",
        app.status_message,
        sessions.active_index() + 1,
        sessions.len(),
        on_off(tab.echo),
        on_off(tab.line_numbers),
        result
    );

    let status_paragraph =
        Paragraph::new(status_text).style(Style::default().bg(Color::DarkGray).fg(Color::White));

    frame.render_widget(status_paragraph, area);
}

const HELP: &[(&str, &str)] = &[
    ("F5 / Ctrl+E", "Execute the selection, or the whole input"),
    ("Shift+arrows / Ctrl+A", "Select text"),
    ("Ctrl+T", "New tab"),
    ("Ctrl+W", "Close tab"),
    ("F7 / F8", "Previous / next tab"),
    ("F6", "Rename tab"),
    ("Ctrl+L", "Clear output"),
    ("Ctrl+K", "Clear input"),
    ("Ctrl+O", "Load a script into this tab"),
    ("F4", "Open a script in a new tab"),
    ("Ctrl+S", "Save the input"),
    ("F2", "Toggle echo"),
    ("F3", "Toggle line numbers"),
    ("PgUp / PgDn", "Scroll output"),
    ("Tab", "Indent"),
    ("F1", "Toggle this help"),
    ("Ctrl+C twice / Ctrl+Q", "Quit"),
];

/// Render help overlay
fn render_help_overlay(frame: &mut Frame) {
    let popup_area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, popup_area);

    let mut help_lines = vec![Line::from("Console Help"), Line::from("")];
    help_lines.extend(HELP.iter().map(|(keys, action)| {
        Line::from(vec![
            Span::styled(format!("  {:<24}", keys), Style::default().fg(Color::Cyan)),
            Span::raw(*action),
        ])
    }));

    let help_paragraph = Paragraph::new(Text::from(help_lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .title_style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(help_paragraph, popup_area);
}

fn render_prompt_popup(frame: &mut Frame, title: &str, value: &str) {
    let area = frame.area();
    let popup_area = centered_rect(70, 20, area);
    let popup_area = Rect {
        height: popup_area.height.clamp(3.min(area.height), 5.min(area.height)),
        ..popup_area
    };
    frame.render_widget(Clear, popup_area);

    let paragraph = Paragraph::new(value)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} (Enter confirm, Esc cancel)", title))
                .title_style(
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::BOLD),
                ),
        );
    frame.render_widget(paragraph, popup_area);

    let width = unicode_width::UnicodeWidthStr::width(value) as u16;
    frame.set_cursor_position(Position::new(
        (popup_area.x + 1 + width).min(popup_area.right().saturating_sub(2)),
        popup_area.y + 1,
    ));
}

fn render_message_popup(frame: &mut Frame, title: &str, text: &str) {
    let popup_area = centered_rect(70, 40, frame.area());
    frame.render_widget(Clear, popup_area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(popup_area);

    let paragraph = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .title_style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, layout[0]);

    let instructions =
        Paragraph::new("Press any key to close").style(Style::default().fg(Color::Yellow));
    frame.render_widget(instructions, layout[1]);
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn segments_split_into_lines() {
        let segments = vec![
            Segment::new(SegmentKind::Input, ">>> print('a', end='')\n>>> 1"),
            Segment::new(SegmentKind::Output, "a"),
            Segment::new(SegmentKind::Error, "b\nc\n"),
            Segment::new(SegmentKind::Output, "tail"),
        ];
        let lines = output_lines(&segments);
        assert_eq!(
            plain(&lines),
            vec![">>> print('a', end='')", ">>> 1", "ab", "c", "tail"]
        );
        assert_eq!(lines[2].spans[1].style.fg, Some(Color::Red));
    }

    #[test]
    fn selection_is_split_into_its_own_span() {
        let lines = input_lines("ab\ncd\nef", Some(1..4), false);
        assert_eq!(plain(&lines), vec!["ab ", "cd", "ef"]);
        assert_eq!(lines[0].spans[1].content, "b ");
        assert!(lines[0].spans[1].style.add_modifier.contains(Modifier::REVERSED));
        assert_eq!(lines[1].spans[1].content, "c");
        assert_eq!(lines[1].spans[2].content, "d");
        assert_eq!(lines[2].spans.len(), 1);

        let numbered = input_lines("x", None, true);
        assert_eq!(plain(&numbered), vec!["1 x"]);
    }

    #[test]
    fn blank_output_lines_are_kept() {
        let lines = output_lines(&[Segment::new(SegmentKind::Output, "x\n\ny\n")]);
        assert_eq!(plain(&lines), vec!["x", "", "y"]);
    }
}
