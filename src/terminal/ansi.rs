//! Restricted ANSI interpretation
//!
//! Two passes over the text:
//! 1. Non-color CSI sequences (`ESC [ <0-9;?>* <letter except m>`) are removed.
//! 2. SGR sequences (`ESC [ <0-9;>* m`) update foreground/background state;
//!    the text between them becomes [`StyledRun`]s.
//!
//! Both are regex matches. Anything else, including incomplete sequences, is
//! kept as plain text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// At most this many SGR parameters are applied per sequence
const MAX_SGR_PARAMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    DarkGray,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

const NORMAL: [Color; 8] = [
    Color::Black,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::White,
];

const BRIGHT: [Color; 8] = [
    Color::DarkGray,
    Color::BrightRed,
    Color::BrightGreen,
    Color::BrightYellow,
    Color::BrightBlue,
    Color::BrightMagenta,
    Color::BrightCyan,
    Color::BrightWhite,
];

/// Current color state; `None` means the surface default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Style {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
}

impl Style {
    pub fn is_plain(&self) -> bool {
        self.fg.is_none() && self.bg.is_none()
    }

    /// Apply one SGR parameter string, e.g. `"1;31"`
    pub fn apply_sgr(&mut self, params: &str) {
        if params.is_empty() {
            self.apply_code(0);
            return;
        }
        for code in params
            .split(';')
            .take(MAX_SGR_PARAMS)
            .filter_map(|p| p.parse::<u32>().ok())
        {
            self.apply_code(code);
        }
    }

    fn apply_code(&mut self, code: u32) {
        match code {
            0 => *self = Style::default(),
            30..=37 => self.fg = Some(NORMAL[(code - 30) as usize]),
            39 => self.fg = None,
            40..=47 => self.bg = Some(NORMAL[(code - 40) as usize]),
            49 => self.bg = None,
            90..=97 => self.fg = Some(BRIGHT[(code - 90) as usize]),
            // bold, underline, 256-color etc. are not rendered
            _ => {}
        }
    }
}

/// A span of text drawn with one style
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyledRun {
    pub text: String,
    pub style: Style,
}

/// Cursor movement, erase and other non-color CSI sequences
static CONTROL_SEQUENCE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[a-ln-zA-LN-Z]"));

/// Color-only SGR sequences
static SGR_SEQUENCE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\x1b\[([0-9;]*)m"));

fn pattern(
    cell: &'static LazyLock<Result<Regex, regex::Error>>,
) -> Option<&'static Regex> {
    match cell.as_ref() {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("ANSI pattern unavailable, rendering text as-is: {}", e);
            None
        }
    }
}

/// First pass: drop cursor movement and other non-color sequences
pub fn strip_control_sequences(text: &str) -> String {
    match pattern(&CONTROL_SEQUENCE) {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Second pass: split text into styled runs starting from `style`.
///
/// Returns the runs and the style in effect at the end of the text.
pub fn styled_runs(text: &str, mut style: Style) -> (Vec<StyledRun>, Style) {
    let mut runs = Vec::new();
    let mut last_end = 0;

    if let Some(re) = pattern(&SGR_SEQUENCE) {
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            push_run(&mut runs, &text[last_end..whole.start()], style);
            style.apply_sgr(caps.get(1).map_or("", |m| m.as_str()));
            last_end = whole.end();
        }
    }

    push_run(&mut runs, &text[last_end..], style);
    (runs, style)
}

/// Both passes over `text`
pub fn render(text: &str, style: Style) -> (Vec<StyledRun>, Style) {
    styled_runs(&strip_control_sequences(text), style)
}

fn push_run(runs: &mut Vec<StyledRun>, text: &str, style: Style) {
    if !text.is_empty() {
        runs.push(StyledRun {
            text: text.to_string(),
            style,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_cursor_movement() {
        assert_eq!(strip_control_sequences("a\x1b[2Kb\x1b[?25lc\x1b[10;5Hd"), "abcd");
    }

    #[test]
    fn test_keeps_sgr_and_unknown_sequences() {
        let text = "\x1b[31mred\x1b]0;title\x07";
        assert_eq!(strip_control_sequences(text), text);
    }

    #[test]
    fn test_red_then_reset() {
        let (runs, end) = render("\x1b[31mred\x1b[0m plain", Style::default());

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "red");
        assert_eq!(runs[0].style.fg, Some(Color::Red));
        assert_eq!(runs[1].text, " plain");
        assert!(runs[1].style.is_plain());
        assert!(end.is_plain());
    }

    #[test]
    fn test_empty_params_reset() {
        let mut style = Style {
            fg: Some(Color::Green),
            bg: Some(Color::Blue),
        };
        style.apply_sgr("");
        assert!(style.is_plain());
    }

    #[test]
    fn test_bright_and_background_codes() {
        let mut style = Style::default();
        style.apply_sgr("90;44");
        assert_eq!(style.fg, Some(Color::DarkGray));
        assert_eq!(style.bg, Some(Color::Blue));

        style.apply_sgr("97;49");
        assert_eq!(style.fg, Some(Color::BrightWhite));
        assert_eq!(style.bg, None);

        style.apply_sgr("39");
        assert!(style.is_plain());
    }

    #[test]
    fn test_only_first_ten_params_applied() {
        let mut style = Style::default();
        // eleventh parameter would set red
        style.apply_sgr("1;1;1;1;1;1;1;1;1;1;31");
        assert_eq!(style.fg, None);

        style.apply_sgr("1;1;1;1;1;1;1;1;1;32");
        assert_eq!(style.fg, Some(Color::Green));
    }

    #[test]
    fn test_stripping_happens_before_sgr_scan() {
        // a cursor sequence inside an SGR is removed first
        let (runs, _) = render("\x1b[3\x1b[2K1mX", Style::default());
        assert_eq!(runs[0].text, "X");
        assert_eq!(runs[0].style.fg, Some(Color::Red));
    }

    #[test]
    fn test_incomplete_sequence_is_text() {
        let (runs, _) = render("abc\x1b[31", Style::default());
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "abc\x1b[31");
    }

    #[test]
    fn test_sgr_with_unknown_final_letter_left_for_first_pass() {
        // `m` is the only SGR final; other letters never reach the color pass
        assert_eq!(strip_control_sequences("a\x1b[1;2rb"), "ab");
        let (runs, style) = styled_runs("a\x1b[1;2rb", Style::default());
        assert_eq!(runs.len(), 1);
        assert!(style.is_plain());
    }

    #[test]
    fn test_multibyte_text_between_sequences() {
        let (runs, _) = render("\x1b[32mgrün\x1b[0m→", Style::default());
        assert_eq!(runs[0].text, "grün");
        assert_eq!(runs[1].text, "→");
    }
}
