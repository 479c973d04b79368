//! Printers for batch mode: coloured segments or JSON lines.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::output::{Segment, SegmentKind};

pub struct TextPrinter {
    pub color: bool,
}

impl TextPrinter {
    /// Segment text as it should appear on a terminal. Echoed input is a
    /// whole line even without a trailing newline.
    pub fn render(&self, segment: &Segment) -> String {
        let mut text = segment.text.clone();
        if segment.kind == SegmentKind::Input && !text.ends_with('\n') {
            text.push('\n');
        }
        if !self.color {
            return text;
        }
        match segment.kind {
            SegmentKind::Input => text.green().to_string(),
            SegmentKind::Error => text.red().to_string(),
            SegmentKind::Output => text,
        }
    }

    /// Errors go to stderr, everything else to stdout.
    pub fn print(&self, segment: &Segment) -> io::Result<()> {
        let text = self.render(segment);
        match segment.kind {
            SegmentKind::Error => {
                let mut err = io::stderr().lock();
                err.write_all(text.as_bytes())?;
                err.flush()
            }
            _ => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes())?;
                out.flush()
            }
        }
    }
}

/// One JSON object per line on stdout.
pub struct JsonPrinter;

impl JsonPrinter {
    pub fn print(&self, segment: &Segment) -> anyhow::Result<()> {
        let line = serde_json::to_string(segment)?;
        println!("{}", line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_render_terminates_input_lines() {
        let printer = TextPrinter { color: false };
        assert_eq!(
            printer.render(&Segment::new(SegmentKind::Input, ">>> x = 1")),
            ">>> x = 1\n"
        );
        assert_eq!(printer.render(&Segment::new(SegmentKind::Output, "2")), "2");
    }

    #[test]
    fn colour_wraps_errors_only_in_escape_codes() {
        let printer = TextPrinter { color: true };
        let error = printer.render(&Segment::new(SegmentKind::Error, "boom\n"));
        assert!(error.starts_with('\u{1b}'));
        assert!(error.contains("boom\n"));
        assert_eq!(printer.render(&Segment::new(SegmentKind::Output, "ok\n")), "ok\n");
    }
}
