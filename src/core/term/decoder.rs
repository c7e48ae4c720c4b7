//! SGR escape-sequence decoder
//!
//! Turns a text chunk containing `ESC [ ... m` sequences into styled runs.
//! Every call is self-contained: style never leaks from one chunk into the
//! next, and anything that does not parse as SGR is kept as literal text.

use super::style::{AttrFlags, Color, Style, StyledRun};

/// Control Sequence Introducer
pub const CSI: &str = "\x1b[";

/// Result of decoding one chunk
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub runs: Vec<StyledRun>,
    /// Style scopes still open at the end of the chunk
    pub open_scopes: usize,
}

impl Decoded {
    /// Concatenated text of all runs
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// A piece of a tokenized chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Sgr(Vec<u16>),
}

/// Split a chunk into literal text and SGR parameter lists.
pub fn segments(chunk: &str) -> Vec<Segment<'_>> {
    let starts: Vec<usize> = chunk.match_indices(CSI).map(|(i, _)| i).collect();
    let mut out = Vec::with_capacity(starts.len() * 2 + 1);

    let head_end = starts.first().copied().unwrap_or(chunk.len());
    if head_end > 0 {
        out.push(Segment::Text(&chunk[..head_end]));
    }

    for (k, &start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).copied().unwrap_or(chunk.len());
        let body = &chunk[start + CSI.len()..end];
        match parse_sgr(body) {
            Some((params, consumed)) => {
                out.push(Segment::Sgr(params));
                if consumed < body.len() {
                    out.push(Segment::Text(&body[consumed..]));
                }
            }
            None => {
                tracing::trace!("Passing through malformed escape: {:?}", &chunk[start..end]);
                out.push(Segment::Text(&chunk[start..end]));
            }
        }
    }

    out
}

/// Parse `digits(;digits)*m` at the start of `body`.
/// Returns the parameters and the number of bytes consumed.
fn parse_sgr(body: &str) -> Option<(Vec<u16>, usize)> {
    let terminator = body.find(|c: char| !(c.is_ascii_digit() || c == ';'))?;
    if body.as_bytes()[terminator] != b'm' {
        return None;
    }

    let raw = &body[..terminator];
    let params = if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(';')
            .map(|p| {
                p.bytes().fold(0u16, |acc, d| {
                    acc.saturating_mul(10).saturating_add((d - b'0') as u16)
                })
            })
            .collect()
    };
    Some((params, terminator + 1))
}

/// Effect of a single SGR escape on scope accounting
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SgrEffect {
    /// Scopes closed by a reset
    pub closed: usize,
    /// Attributes set after the last reset, if any; opens one scope
    pub opened: Option<Style>,
}

/// Accumulated SGR state for one chunk
#[derive(Clone, Debug, Default)]
pub struct SgrState {
    pub style: Style,
    pub open_scopes: usize,
}

impl SgrState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one escape's parameters, left to right.
    pub fn apply(&mut self, params: &[u16]) -> SgrEffect {
        let mut effect = SgrEffect::default();

        if params.is_empty() {
            effect.closed = self.reset();
            return effect;
        }

        let mut delta = Style::default();
        let mut changed = false;
        let mut iter = params.iter().copied();

        while let Some(param) = iter.next() {
            match param {
                0 => {
                    effect.closed += self.reset();
                    delta = Style::default();
                    changed = false;
                }
                1 => {
                    self.style.flags |= AttrFlags::BOLD;
                    delta.flags |= AttrFlags::BOLD;
                    changed = true;
                }
                3 => {
                    self.style.flags |= AttrFlags::ITALIC;
                    delta.flags |= AttrFlags::ITALIC;
                    changed = true;
                }
                4 => {
                    self.style.flags |= AttrFlags::UNDERLINE;
                    delta.flags |= AttrFlags::UNDERLINE;
                    changed = true;
                }
                30..=37 => {
                    let color = Color::Named((param - 30) as u8);
                    self.style.fg = Some(color);
                    delta.fg = Some(color);
                    changed = true;
                }
                38 => match iter.next() {
                    Some(5) => {
                        if let Some(n) = iter.next() {
                            let color = Color::Indexed(clamp_u8(n));
                            self.style.fg = Some(color);
                            delta.fg = Some(color);
                            changed = true;
                        }
                    }
                    Some(2) => {
                        if let Some(color) = take_rgb(&mut iter) {
                            self.style.fg = Some(color);
                            delta.fg = Some(color);
                            changed = true;
                        }
                    }
                    _ => {}
                },
                48 => {
                    if iter.next() == Some(2) {
                        if let Some(color) = take_rgb(&mut iter) {
                            self.style.bg = Some(color);
                            delta.bg = Some(color);
                            changed = true;
                        }
                    }
                }
                // Unrecognized codes are ignored
                _ => {}
            }
        }

        if changed {
            self.open_scopes += 1;
            effect.opened = Some(delta);
        }
        effect
    }

    fn reset(&mut self) -> usize {
        self.style.reset();
        std::mem::take(&mut self.open_scopes)
    }
}

fn take_rgb(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    let r = iter.next()?;
    let g = iter.next()?;
    let b = iter.next()?;
    Some(Color::Rgb(clamp_u8(r), clamp_u8(g), clamp_u8(b)))
}

fn clamp_u8(n: u16) -> u8 {
    n.min(u8::MAX as u16) as u8
}

/// Decode a chunk into styled runs.
pub fn decode(chunk: &str) -> Decoded {
    let mut state = SgrState::new();
    let mut runs: Vec<StyledRun> = Vec::new();

    for segment in segments(chunk) {
        match segment {
            Segment::Text(text) => push_run(&mut runs, text, state.style),
            Segment::Sgr(params) => {
                state.apply(&params);
            }
        }
    }

    Decoded {
        runs,
        open_scopes: state.open_scopes,
    }
}

/// Append text, merging with the previous run when the style matches.
pub(crate) fn push_run(runs: &mut Vec<StyledRun>, text: &str, style: Style) {
    if text.is_empty() {
        return;
    }
    match runs.last_mut() {
        Some(last) if last.style == style => last.text.push_str(text),
        _ => runs.push(StyledRun::new(text, style)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let decoded = decode("plain");
        assert_eq!(decoded.runs, vec![StyledRun::plain("plain")]);
        assert_eq!(decoded.open_scopes, 0);
    }

    #[test]
    fn test_bold_then_reset() {
        let decoded = decode("\x1b[1mbold\x1b[0m text");
        assert_eq!(decoded.runs.len(), 2);
        assert_eq!(decoded.runs[0].text, "bold");
        assert!(decoded.runs[0].style.bold());
        assert_eq!(decoded.runs[1].text, " text");
        assert!(!decoded.runs[1].style.bold());
        assert_eq!(decoded.open_scopes, 0);
    }

    #[test]
    fn test_named_and_extended_colors() {
        let decoded = decode("\x1b[31mred\x1b[38;5;208morange\x1b[38;2;1;2;3mrgb\x1b[48;2;9;8;7mbg");
        assert_eq!(decoded.runs[0].style.fg, Some(Color::Named(1)));
        assert_eq!(decoded.runs[1].style.fg, Some(Color::Indexed(208)));
        assert_eq!(decoded.runs[2].style.fg, Some(Color::Rgb(1, 2, 3)));
        assert_eq!(decoded.runs[3].style.fg, Some(Color::Rgb(1, 2, 3)));
        assert_eq!(decoded.runs[3].style.bg, Some(Color::Rgb(9, 8, 7)));
        assert_eq!(decoded.open_scopes, 4);
    }

    #[test]
    fn test_attributes_accumulate_within_one_escape() {
        let decoded = decode("\x1b[1;3;4mx");
        let style = decoded.runs[0].style;
        assert!(style.bold() && style.italic() && style.underline());
        assert_eq!(decoded.open_scopes, 1);
    }

    #[test]
    fn test_reset_inside_escape_closes_then_reopens() {
        let decoded = decode("\x1b[1ma\x1b[32mb\x1b[0;4mc");
        assert_eq!(decoded.open_scopes, 1);
        let last = decoded.runs.last().unwrap();
        assert_eq!(last.text, "c");
        assert!(last.style.underline());
        assert!(!last.style.bold());
        assert_eq!(last.style.fg, None);
    }

    #[test]
    fn test_unrecognized_codes_ignored() {
        let decoded = decode("\x1b[5;9mtext");
        assert_eq!(decoded.runs, vec![StyledRun::plain("text")]);
        assert_eq!(decoded.open_scopes, 0);
    }

    #[test]
    fn test_malformed_escape_passes_through() {
        let decoded = decode("a\x1b[2Jb");
        assert_eq!(decoded.text(), "a\x1b[2Jb");
        assert_eq!(decoded.runs.len(), 1);
    }

    #[test]
    fn test_trailing_incomplete_escape_is_literal() {
        let decoded = decode("done\x1b[1;3");
        assert_eq!(decoded.text(), "done\x1b[1;3");
        assert_eq!(decoded.open_scopes, 0);

        // The next chunk starts fresh
        let next = decode("m next");
        assert_eq!(next.runs, vec![StyledRun::plain("m next")]);
    }

    #[test]
    fn test_incomplete_extended_color_ignored() {
        let decoded = decode("\x1b[38;5mx\x1b[38;2;10;20my");
        assert_eq!(decoded.runs, vec![StyledRun::plain("xy")]);
        assert_eq!(decoded.open_scopes, 0);
    }

    #[test]
    fn test_empty_params_reset() {
        let decoded = decode("\x1b[1mon\x1b[moff");
        assert!(decoded.runs[0].style.bold());
        assert!(decoded.runs[1].style.is_plain());
        assert_eq!(decoded.open_scopes, 0);
    }

    #[test]
    fn test_control_characters_kept_as_text() {
        let decoded = decode("a\rb\nc");
        assert_eq!(decoded.text(), "a\rb\nc");
    }

    #[test]
    fn test_empty_chunk() {
        assert_eq!(decode(""), Decoded::default());
    }
}
