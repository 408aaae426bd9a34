//! Keyboard and input-method text to shell input

/// Keys with a fixed byte encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Enter,
    Tab,
    Backspace,
    CtrlC,
    CtrlD,
}

impl KeyInput {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyInput::Enter => "\n",
            KeyInput::Tab => "\t",
            KeyInput::Backspace => "\u{8}",
            KeyInput::CtrlC => "\u{3}",
            KeyInput::CtrlD => "\u{4}",
        }
    }
}

/// Normalize text committed by an input method.
///
/// A lone newline (either form) is Enter; otherwise line breaks are removed.
/// Returns `None` when nothing is left to send.
pub fn normalize_committed(text: &str) -> Option<String> {
    let normalized = match text {
        "" => return None,
        "\n" | "\r\n" => "\n".to_string(),
        other => other.chars().filter(|c| *c != '\r' && *c != '\n').collect(),
    };
    (!normalized.is_empty()).then_some(normalized)
}

/// One backspace per deleted character
pub fn delete_before(count: usize) -> String {
    KeyInput::Backspace.as_str().repeat(count)
}
