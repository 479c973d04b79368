//! Multi-line text editing on a `String` plus a byte cursor. The cursor is
//! always kept on a char boundary.

use std::ops::Range;

use unicode_width::UnicodeWidthStr;

pub const INDENT: &str = "    ";

fn line_start(text: &str, cursor: usize) -> usize {
    text[..cursor].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

fn line_end(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .find('\n')
        .map(|i| cursor + i)
        .unwrap_or(text.len())
}

/// Clamps a cursor that may have been left past the end by an external
/// edit (clear, load) back onto the text.
pub fn clamp(text: &str, cursor: usize) -> usize {
    let mut cursor = cursor.min(text.len());
    while !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

/// Zero-based (line, display column) of the cursor.
pub fn line_col(text: &str, cursor: usize) -> (usize, usize) {
    let start = line_start(text, cursor);
    let line = text[..start].matches('\n').count();
    (line, text[start..cursor].width())
}

/// Ordered byte range between a selection anchor and the cursor. `None`
/// when there is no anchor or nothing lies between the two.
pub fn selection(anchor: Option<usize>, cursor: usize) -> Option<Range<usize>> {
    let anchor = anchor?;
    (anchor != cursor).then(|| anchor.min(cursor)..anchor.max(cursor))
}

pub fn delete_selection(text: &mut String, cursor: &mut usize, range: Range<usize>) {
    *cursor = range.start;
    text.replace_range(range, "");
}

pub fn insert_char(text: &mut String, cursor: &mut usize, c: char) {
    text.insert(*cursor, c);
    *cursor += c.len_utf8();
}

pub fn insert_str(text: &mut String, cursor: &mut usize, s: &str) {
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    text.insert_str(*cursor, &s);
    *cursor += s.len();
}

/// Breaks the line, carrying the current indentation over and adding one
/// level after a line that opens a block.
pub fn insert_newline(text: &mut String, cursor: &mut usize) {
    let start = line_start(text, *cursor);
    let before = &text[start..*cursor];
    let mut indent: String = before.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
    if before.trim_end().ends_with(':') {
        indent.push_str(INDENT);
    }
    insert_str(text, cursor, &format!("\n{}", indent));
}

pub fn insert_indent(text: &mut String, cursor: &mut usize) {
    insert_str(text, cursor, INDENT);
}

/// Deletes backwards. Inside leading spaces a whole indent level goes.
pub fn backspace(text: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let start = line_start(text, *cursor);
    let before = &text[start..*cursor];
    if !before.is_empty() && before.chars().all(|c| c == ' ') {
        let width = match before.len() % INDENT.len() {
            0 => INDENT.len(),
            partial => partial,
        };
        text.replace_range(*cursor - width..*cursor, "");
        *cursor -= width;
        return;
    }
    if let Some(c) = text[..*cursor].chars().next_back() {
        *cursor -= c.len_utf8();
        text.remove(*cursor);
    }
}

pub fn delete(text: &mut String, cursor: &mut usize) {
    if *cursor < text.len() {
        text.remove(*cursor);
    }
}

pub fn move_left(text: &str, cursor: &mut usize) {
    if let Some(c) = text[..*cursor].chars().next_back() {
        *cursor -= c.len_utf8();
    }
}

pub fn move_right(text: &str, cursor: &mut usize) {
    if let Some(c) = text[*cursor..].chars().next() {
        *cursor += c.len_utf8();
    }
}

pub fn move_home(text: &str, cursor: &mut usize) {
    *cursor = line_start(text, *cursor);
}

pub fn move_end(text: &str, cursor: &mut usize) {
    *cursor = line_end(text, *cursor);
}

fn offset_for_column(line: &str, column: usize) -> usize {
    line.char_indices()
        .nth(column)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

pub fn move_up(text: &str, cursor: &mut usize) {
    let start = line_start(text, *cursor);
    if start == 0 {
        return;
    }
    let column = text[start..*cursor].chars().count();
    let prev_start = line_start(text, start - 1);
    *cursor = prev_start + offset_for_column(&text[prev_start..start - 1], column);
}

pub fn move_down(text: &str, cursor: &mut usize) {
    let end = line_end(text, *cursor);
    if end == text.len() {
        return;
    }
    let column = text[line_start(text, *cursor)..*cursor].chars().count();
    let next_start = end + 1;
    let next_end = line_end(text, next_start);
    *cursor = next_start + offset_for_column(&text[next_start..next_end], column);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(text: &str) -> (String, usize) {
        (text.to_string(), text.len())
    }

    #[test]
    fn newline_keeps_indent_and_opens_blocks() {
        let (mut text, mut cursor) = edit("def f(x):");
        insert_newline(&mut text, &mut cursor);
        assert_eq!(text, "def f(x):\n    ");
        insert_str(&mut text, &mut cursor, "return x");
        insert_newline(&mut text, &mut cursor);
        assert_eq!(text, "def f(x):\n    return x\n    ");
        assert_eq!(cursor, text.len());
    }

    #[test]
    fn backspace_removes_an_indent_level() {
        let (mut text, mut cursor) = edit("if x:\n        ");
        backspace(&mut text, &mut cursor);
        assert_eq!(text, "if x:\n    ");
        backspace(&mut text, &mut cursor);
        backspace(&mut text, &mut cursor);
        assert_eq!(text, "if x:");
    }

    #[test]
    fn cursor_moves_respect_multibyte_chars() {
        let (mut text, mut cursor) = edit("añb");
        move_left(&text, &mut cursor);
        move_left(&text, &mut cursor);
        assert_eq!(cursor, 1);
        delete(&mut text, &mut cursor);
        assert_eq!(text, "ab");
        move_right(&text, &mut cursor);
        assert_eq!(cursor, 2);
    }

    #[test]
    fn vertical_moves_keep_the_column() {
        let text = "abcdef\nxy\nlonger line";
        let mut cursor = 5;
        move_down(text, &mut cursor);
        assert_eq!(line_col(text, cursor), (1, 2));
        move_down(text, &mut cursor);
        assert_eq!(line_col(text, cursor), (2, 2));
        move_up(text, &mut cursor);
        move_up(text, &mut cursor);
        assert_eq!(cursor, 2);
        move_end(text, &mut cursor);
        assert_eq!(cursor, 6);
        move_home(text, &mut cursor);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn selection_is_ordered_either_way() {
        assert_eq!(selection(Some(7), 2), Some(2..7));
        assert_eq!(selection(Some(2), 7), Some(2..7));
        assert_eq!(selection(Some(3), 3), None);
        assert_eq!(selection(None, 3), None);

        let mut text = "x = 1\ny = 2".to_string();
        let mut cursor = 9;
        delete_selection(&mut text, &mut cursor, 4..9);
        assert_eq!(text, "x = 2");
        assert_eq!(cursor, 4);
    }

    #[test]
    fn clamp_pulls_cursor_back_inside() {
        assert_eq!(clamp("añ", 10), 3);
        assert_eq!(clamp("añ", 2), 1);
        assert_eq!(clamp("", 4), 0);
    }
}
