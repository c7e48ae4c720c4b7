//! Text style model
//!
//! Styled runs and terminal lines produced by the decoder and compositor.

use bitflags::bitflags;
use unicode_width::UnicodeWidthStr;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0000_0001;
        const ITALIC    = 0b0000_0010;
        const UNDERLINE = 0b0000_0100;
    }
}

/// Color definition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    /// 4-bit named palette entry (0..=7)
    Named(u8),
    /// 256-color palette index
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Names of the 8-entry palette, in SGR order (30..=37)
pub const NAMED_PALETTE: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

impl Color {
    /// Convert to crossterm color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        match self {
            Color::Named(n) | Color::Indexed(n) => crossterm::style::Color::AnsiValue(*n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb {
                r: *r,
                g: *g,
                b: *b,
            },
        }
    }

    /// CSS value for markup rendering
    pub fn to_css(&self) -> String {
        match self {
            Color::Named(n) => NAMED_PALETTE[(*n as usize) % NAMED_PALETTE.len()].to_string(),
            Color::Indexed(n) => {
                let (r, g, b) = xterm_256_rgb(*n);
                format!("rgb({},{},{})", r, g, b)
            }
            Color::Rgb(r, g, b) => format!("rgb({},{},{})", r, g, b),
        }
    }
}

/// Approximate RGB for an xterm 256-color palette index.
fn xterm_256_rgb(n: u8) -> (u8, u8, u8) {
    const BASE: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (205, 0, 0),
        (0, 205, 0),
        (205, 205, 0),
        (0, 0, 238),
        (205, 0, 205),
        (0, 205, 205),
        (229, 229, 229),
        (127, 127, 127),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (92, 92, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];
    match n {
        0..=15 => BASE[n as usize],
        16..=231 => {
            let i = n - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
            (level(i / 36), level((i / 6) % 6), level(i % 6))
        }
        _ => {
            let v = 8 + (n - 232) * 10;
            (v, v, v)
        }
    }
}

/// Text attributes carried by a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Style {
    pub flags: AttrFlags,
    pub fg: Option<Color>,
    pub bg: Option<Color>,
}

impl Style {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }

    pub fn bold(&self) -> bool {
        self.flags.contains(AttrFlags::BOLD)
    }

    pub fn italic(&self) -> bool {
        self.flags.contains(AttrFlags::ITALIC)
    }

    pub fn underline(&self) -> bool {
        self.flags.contains(AttrFlags::UNDERLINE)
    }
}

/// A span of text sharing one style
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub style: Style,
}

impl StyledRun {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Style::default())
    }
}

/// Line classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LineKind {
    Stdout,
    Stderr,
    System,
    Input,
    /// Carriage-return redraw target, replaced in place
    Overwrite,
}

/// Stable identity of a line in the output log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(pub u64);

/// A composed terminal line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalLine {
    /// Assigned by the output log on append
    pub id: LineId,
    pub kind: LineKind,
    /// Kind the line was produced as; an `Overwrite` line keeps the stream
    /// (`Stdout` or `Stderr`) it was written to
    pub origin: LineKind,
    pub runs: Vec<StyledRun>,
    /// Prefers fixed-width rendering (box drawing, ascii tables)
    pub monospace: bool,
}

impl TerminalLine {
    pub fn new(kind: LineKind, runs: Vec<StyledRun>) -> Self {
        let monospace = looks_tabular(&concat_text(&runs));
        Self {
            id: LineId(0),
            kind,
            origin: kind,
            runs,
            monospace,
        }
    }

    pub fn with_origin(mut self, origin: LineKind) -> Self {
        self.origin = origin;
        self
    }

    /// Whether the line came from the program's standard error
    pub fn is_stderr(&self) -> bool {
        self.origin == LineKind::Stderr
    }

    pub fn plain(kind: LineKind, text: impl Into<String>) -> Self {
        let text = text.into();
        let runs = if text.is_empty() {
            Vec::new()
        } else {
            vec![StyledRun::plain(text)]
        };
        Self::new(kind, runs)
    }

    /// Visible text without styling
    pub fn text(&self) -> String {
        concat_text(&self.runs)
    }

    /// Display width in terminal columns
    pub fn width(&self) -> usize {
        self.runs.iter().map(|r| r.text.width()).sum()
    }
}

fn concat_text(runs: &[StyledRun]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}

const SYMBOL_CHARS: &str = "─│┌┐└┘├┤┬┴┼═║╔╗╚╝╠╣╦╩╬━┃┏┓┗┛-=_|+*#~.:";

/// Heuristic for box-drawing/table lines: at least 3 separate runs of 3+
/// repeats of one symbol character. A run is counted when it ends.
pub fn looks_tabular(text: &str) -> bool {
    let mut runs = 0;
    let mut current: Option<(char, usize)> = None;

    for ch in text.chars().chain(std::iter::once('\0')) {
        match current {
            Some((prev, len)) if prev == ch => current = Some((prev, len + 1)),
            _ => {
                if matches!(current, Some((_, len)) if len >= 3) {
                    runs += 1;
                }
                current = SYMBOL_CHARS.contains(ch).then_some((ch, 1));
            }
        }
    }
    runs >= 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_detection() {
        assert!(looks_tabular("+-----+-----+-----+"));
        assert!(looks_tabular("┌───┬───┬───┐"));
        assert!(looks_tabular("--- | --- | ---"));
        assert!(!looks_tabular("hello, world..."));
        assert!(!looks_tabular("--- Session Started ---"));
    }

    #[test]
    fn test_single_long_run_is_not_a_table() {
        assert!(!looks_tabular("========="));
        assert!(!looks_tabular("loading............"));
        assert!(looks_tabular("===  ===  ==="));
    }

    #[test]
    fn test_line_width_counts_wide_chars() {
        let line = TerminalLine::plain(LineKind::Stdout, "日本ab");
        assert_eq!(line.width(), 6);
        assert_eq!(line.text(), "日本ab");
    }

    #[test]
    fn test_indexed_css() {
        assert_eq!(Color::Indexed(196).to_css(), "rgb(255,0,0)");
        assert_eq!(Color::Named(1).to_css(), "red");
        assert_eq!(Color::Indexed(232).to_css(), "rgb(8,8,8)");
    }
}
