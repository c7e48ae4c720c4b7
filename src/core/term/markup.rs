//! Markup rendering of SGR chunks
//!
//! Emits HTML with one `<span>` per opened style scope. A reset closes
//! exactly the scopes that are open, and whatever is still open at the end
//! of the chunk is closed there, so the output is always balanced.

use super::decoder::{segments, Segment, SgrState};
use super::style::Style;

/// Render a chunk as escaped markup.
pub fn to_markup(chunk: &str) -> String {
    let mut out = String::with_capacity(chunk.len() + 16);
    let mut state = SgrState::new();

    for segment in segments(chunk) {
        match segment {
            Segment::Text(text) => escape_into(&mut out, text),
            Segment::Sgr(params) => {
                let effect = state.apply(&params);
                for _ in 0..effect.closed {
                    out.push_str("</span>");
                }
                if let Some(delta) = effect.opened {
                    out.push_str("<span style=\"");
                    out.push_str(&css(&delta));
                    out.push_str("\">");
                }
            }
        }
    }

    for _ in 0..state.open_scopes {
        out.push_str("</span>");
    }
    out
}

fn css(style: &Style) -> String {
    let mut decls = Vec::new();
    if style.bold() {
        decls.push("font-weight:bold".to_string());
    }
    if style.italic() {
        decls.push("font-style:italic".to_string());
    }
    if style.underline() {
        decls.push("text-decoration:underline".to_string());
    }
    if let Some(fg) = style.fg {
        decls.push(format!("color:{}", fg.to_css()));
    }
    if let Some(bg) = style.bg {
        decls.push(format!("background-color:{}", bg.to_css()));
    }
    decls.join(";")
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\x1b' => out.push_str("&#27;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced(markup: &str) -> bool {
        markup.matches("<span").count() == markup.matches("</span>").count()
    }

    #[test]
    fn test_scopes_always_balanced() {
        let inputs = [
            "plain",
            "\x1b[1mbold",
            "\x1b[1mbold\x1b[0m text",
            "\x1b[31ma\x1b[1mb\x1b[4mc",
            "\x1b[31ma\x1b[0;1mb\x1b[0m",
            "\x1b[38;5;200mx\x1b[48;2;1;2;3my\x1b[m",
            "\x1b[0m\x1b[0mreset twice",
            "\x1b[1;3",
            "\x1b[99mignored",
        ];
        for input in inputs {
            let markup = to_markup(input);
            assert!(balanced(&markup), "unbalanced for {:?}: {}", input, markup);
        }
    }

    #[test]
    fn test_nested_scopes() {
        assert_eq!(
            to_markup("\x1b[1ma\x1b[31mb\x1b[0mc"),
            "<span style=\"font-weight:bold\">a<span style=\"color:red\">b</span></span>c"
        );
    }

    #[test]
    fn test_dangling_scope_closed_at_end() {
        assert_eq!(
            to_markup("\x1b[4mopen"),
            "<span style=\"text-decoration:underline\">open</span>"
        );
    }

    #[test]
    fn test_text_is_escaped() {
        assert_eq!(to_markup("<b>&\x1b[2J"), "&lt;b&gt;&amp;&#27;[2J");
    }
}
