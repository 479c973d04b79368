//! Output Sink: the append-only record of what a tab displays.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Echoed source text.
    Input,
    Output,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

impl Segment {
    pub fn new(kind: SegmentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Ordered (kind, text) segments. Cloning yields another handle to the same
/// buffer, which is how the redirector writes into a tab's sink.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    segments: Arc<Mutex<Vec<Segment>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Segment>> {
        self.segments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a segment as-is. Empty text is dropped.
    pub fn push(&self, kind: SegmentKind, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.lock().push(Segment::new(kind, text));
    }

    /// Appends stream output, extending the last segment when it has the
    /// same kind so that `print` calls that build up a line stay together.
    pub fn write(&self, kind: SegmentKind, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut segments = self.lock();
        match segments.last_mut() {
            Some(last) if last.kind == kind && kind != SegmentKind::Input => {
                last.text.push_str(text)
            }
            _ => segments.push(Segment::new(kind, text)),
        }
    }

    pub fn segments(&self) -> Vec<Segment> {
        self.lock().clone()
    }

    /// Segments from index `start` onward.
    pub fn segments_since(&self, start: usize) -> Vec<Segment> {
        self.lock().get(start..).map(<[Segment]>::to_vec).unwrap_or_default()
    }

    /// The accumulated text in order. Echoed input is a complete line even
    /// though its segment carries no trailing newline.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for segment in self.lock().iter() {
            out.push_str(&segment.text);
            if segment.kind == SegmentKind::Input && !segment.text.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn same_sink(&self, other: &OutputSink) -> bool {
        Arc::ptr_eq(&self.segments, &other.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_merges_adjacent_stream_output() {
        let sink = OutputSink::new();
        sink.write(SegmentKind::Output, "a");
        sink.write(SegmentKind::Output, "b\n");
        sink.write(SegmentKind::Error, "oops\n");
        sink.write(SegmentKind::Output, "c\n");

        let segments = sink.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::new(SegmentKind::Output, "ab\n"));
        assert_eq!(segments[1].kind, SegmentKind::Error);
        assert_eq!(sink.text(), "ab\noops\nc\n");
    }

    #[test]
    fn push_keeps_segments_apart_and_drops_empty_text() {
        let sink = OutputSink::new();
        sink.push(SegmentKind::Input, ">>> a");
        sink.push(SegmentKind::Input, ">>> b");
        sink.push(SegmentKind::Output, "");
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.text(), ">>> a\n>>> b\n");
        assert_eq!(sink.segments_since(1)[0].text, ">>> b");
        assert!(sink.segments_since(5).is_empty());
    }

    #[test]
    fn clones_share_the_buffer() {
        let sink = OutputSink::new();
        let handle = sink.clone();
        handle.write(SegmentKind::Output, "x");
        assert!(sink.same_sink(&handle));
        assert_eq!(sink.text(), "x");
        sink.clear();
        assert!(handle.is_empty());
        assert!(!sink.same_sink(&OutputSink::new()));
    }

    #[test]
    fn kinds_serialize_lowercase() {
        let json = serde_json::to_string(&Segment::new(SegmentKind::Error, "e")).unwrap();
        assert_eq!(json, r#"{"kind":"error","text":"e"}"#);
    }
}
