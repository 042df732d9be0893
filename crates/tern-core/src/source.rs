//! Line-indexed source buffers and byte spans.
//!
//! A [`SourceBuffer`] owns the text of one source file and an index of line
//! start offsets, so diagnostics can be rendered with a 1-based line number
//! and the offending line as a snippet. [`Span`] is a half-open byte range
//! into the buffer; AST nodes and tokens carry spans, never text.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[lo, hi)` into a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub lo: u32,
    pub hi: u32,
}

impl Span {
    pub fn new(lo: u32, hi: u32) -> Span {
        Span { lo, hi }
    }

    /// A zero-width span, used for synthesized nodes.
    pub fn point(at: u32) -> Span {
        Span { lo: at, hi: at }
    }

    /// The smallest span covering both inputs.
    pub fn merge(self, other: Span) -> Span {
        Span {
            lo: self.lo.min(other.lo),
            hi: self.hi.max(other.hi),
        }
    }
}

/// One source file with a precomputed line index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBuffer {
    name: String,
    text: String,
    /// Byte offset of the start of each line; `line_starts[0] == 0`.
    line_starts: Vec<u32>,
}

impl SourceBuffer {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> SourceBuffer {
        let text = text.into();
        let mut line_starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        SourceBuffer {
            name: name.into(),
            text,
            line_starts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 1-based line number containing the given byte offset.
    pub fn line_of(&self, offset: u32) -> u32 {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx as u32 + 1,
            Err(idx) => idx as u32,
        }
    }

    /// The full text of a 1-based line, without its trailing newline.
    pub fn line_text(&self, line: u32) -> &str {
        let idx = (line as usize).saturating_sub(1);
        let lo = match self.line_starts.get(idx) {
            Some(&lo) => lo as usize,
            None => return "",
        };
        let hi = self
            .line_starts
            .get(idx + 1)
            .map(|&hi| hi as usize)
            .unwrap_or(self.text.len());
        self.text[lo..hi].trim_end_matches(['\n', '\r'])
    }

    /// The line snippet for a span, used in diagnostic rendering.
    pub fn snippet(&self, span: Span) -> &str {
        self.line_text(self.line_of(span.lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_index() {
        let buf = SourceBuffer::new("t", "ab\ncd\n\nef");
        assert_eq!(buf.line_of(0), 1);
        assert_eq!(buf.line_of(2), 1);
        assert_eq!(buf.line_of(3), 2);
        assert_eq!(buf.line_of(6), 3);
        assert_eq!(buf.line_of(7), 4);
    }

    #[test]
    fn line_text_strips_newline() {
        let buf = SourceBuffer::new("t", "ab\ncd\r\nef");
        assert_eq!(buf.line_text(1), "ab");
        assert_eq!(buf.line_text(2), "cd");
        assert_eq!(buf.line_text(3), "ef");
        assert_eq!(buf.line_text(9), "");
    }

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(4, 7);
        let b = Span::new(1, 5);
        assert_eq!(a.merge(b), Span::new(1, 7));
    }

    #[test]
    fn snippet_picks_the_spanned_line() {
        let buf = SourceBuffer::new("t", "first\nsecond\nthird");
        assert_eq!(buf.snippet(Span::new(8, 10)), "second");
    }
}
