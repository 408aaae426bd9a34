//! Stream framing for shell channel output
//!
//! Turns the raw byte stream of a shell channel into units for the consumer:
//! raw chunks for the interactive terminal, discrete lines for scripted runs.

use super::sink::{OutputSink, StreamUnit};

/// How channel output is framed, chosen once at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Every read is forwarded verbatim so prompts and partial escape
    /// sequences render immediately
    #[default]
    Interactive,
    /// Output is split into lines; needed for marker detection
    Scripted,
}

/// Incremental UTF-8 decoder that holds back split multi-byte sequences
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(prefix) = std::str::from_utf8(&self.pending[..valid]) {
                        out.push_str(prefix);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Framer state for one shell channel
#[derive(Debug)]
pub struct StreamFramer {
    mode: FramingMode,
    decoder: Utf8Decoder,
    line: String,
    last_was_cr: bool,
}

impl StreamFramer {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            decoder: Utf8Decoder::default(),
            line: String::new(),
            last_was_cr: false,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Process one read from the channel
    pub fn feed(&mut self, bytes: &[u8], sink: &dyn OutputSink) {
        let text = self.decoder.decode(bytes);
        self.push_text(&text, sink);
    }

    /// No further bytes are immediately available.
    ///
    /// Line mode flushes the pending partial line so prompts without a
    /// trailing newline reach the consumer.
    pub fn idle(&mut self, sink: &dyn OutputSink) {
        if self.mode == FramingMode::Scripted && !self.line.is_empty() {
            sink.deliver(StreamUnit::Partial(std::mem::take(&mut self.line)));
        }
    }

    /// End of stream: flush whatever is left, exactly once
    pub fn finish(&mut self, sink: &dyn OutputSink) {
        let rest = self.decoder.finish();
        self.push_text(&rest, sink);
        self.idle(sink);
    }

    fn push_text(&mut self, text: &str, sink: &dyn OutputSink) {
        if text.is_empty() {
            return;
        }

        match self.mode {
            FramingMode::Interactive => sink.deliver(StreamUnit::Chunk(text.to_string())),
            FramingMode::Scripted => {
                for ch in text.chars() {
                    match ch {
                        '\r' => {
                            self.flush_line(sink);
                            self.last_was_cr = true;
                        }
                        '\n' => {
                            if self.last_was_cr {
                                self.last_was_cr = false;
                            } else {
                                self.flush_line(sink);
                            }
                        }
                        other => {
                            self.last_was_cr = false;
                            self.line.push(other);
                        }
                    }
                }
            }
        }
    }

    fn flush_line(&mut self, sink: &dyn OutputSink) {
        sink.deliver(StreamUnit::Line(std::mem::take(&mut self.line)));
    }
}
