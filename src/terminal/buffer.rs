//! Bounded terminal text buffer
//!
//! Keeps the raw text (escapes included) of the most recent output and
//! re-renders all of it after every append. Eviction always removes the
//! oldest content. Color state survives eviction: the style in effect at
//! the front of the retained text is carried in `base_style`.

use serde::{Deserialize, Serialize};

use super::ansi::{render, StyledRun, Style};

/// Size limits, counted in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalLimits {
    /// Newline-separated lines retained
    pub max_lines: usize,
    /// Characters retained
    pub max_chars: usize,
    /// Longer appends keep only their newest characters
    pub max_chunk_chars: usize,
}

impl Default for TerminalLimits {
    fn default() -> Self {
        Self {
            max_lines: 500,
            max_chars: 200_000,
            max_chunk_chars: 50_000,
        }
    }
}

#[derive(Debug, Default)]
pub struct TerminalBuffer {
    limits: TerminalLimits,
    raw: String,
    base_style: Style,
    pending_cr: bool,
    runs: Vec<StyledRun>,
    style: Style,
}

impl TerminalBuffer {
    pub fn new(limits: TerminalLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn limits(&self) -> TerminalLimits {
        self.limits
    }

    /// Append output and re-render; returns the full styled content
    pub fn append(&mut self, text: &str) -> &[StyledRun] {
        let capped = newest_chars(text, self.limits.max_chunk_chars);
        self.push_normalized(capped);
        self.trim();
        self.rerender();
        &self.runs
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.base_style = Style::default();
        self.pending_cr = false;
        self.runs.clear();
        self.style = Style::default();
    }

    /// Styled content of the whole retained buffer
    pub fn runs(&self) -> &[StyledRun] {
        &self.runs
    }

    /// Retained text with escapes, CRs removed
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// Rendered text without styling
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    /// Color state after the last rendered character
    pub fn current_style(&self) -> Style {
        self.style
    }

    pub fn char_count(&self) -> usize {
        self.raw.chars().count()
    }

    pub fn newline_count(&self) -> usize {
        self.raw.matches('\n').count()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// CR only feeds line-break detection; it is never stored
    fn push_normalized(&mut self, text: &str) {
        self.raw.reserve(text.len());
        for ch in text.chars() {
            match ch {
                '\r' => self.pending_cr = true,
                '\n' => {
                    self.raw.push('\n');
                    self.pending_cr = false;
                }
                other => {
                    self.pending_cr = false;
                    self.raw.push(other);
                }
            }
        }
    }

    fn trim(&mut self) {
        let chars = self.char_count();
        if chars > self.limits.max_chars {
            let cut = byte_offset_of_char(&self.raw, chars - self.limits.max_chars);
            self.evict(cut);
        }

        let newlines = self.newline_count();
        if newlines > self.limits.max_lines {
            let mut to_drop = newlines - self.limits.max_lines;
            let mut cut = 0;
            for (idx, _) in self.raw.match_indices('\n') {
                to_drop -= 1;
                if to_drop == 0 {
                    cut = idx + 1;
                    break;
                }
            }
            self.evict(cut);
        }
    }

    fn evict(&mut self, cut: usize) {
        if cut == 0 {
            return;
        }
        let evicted: String = self.raw.drain(..cut).collect();
        let (_, style) = render(&evicted, self.base_style);
        self.base_style = style;
    }

    fn rerender(&mut self) {
        let (runs, style) = render(&self.raw, self.base_style);
        self.runs = runs;
        self.style = style;
    }
}

/// Suffix of `text` holding at most `max` characters
fn newest_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        text
    } else {
        &text[byte_offset_of_char(text, count - max)..]
    }
}

fn byte_offset_of_char(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(idx, _)| idx)
}
