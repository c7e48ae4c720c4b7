//! Console renderer using crossterm
//!
//! Streams the output log to a terminal: appended lines are printed in
//! order, an overwrite line that is still the last printed line is redrawn
//! in place, and a cleared log clears the screen.

use std::io::{self, Write};

use crossterm::{
    cursor::{MoveTo, MoveToPreviousLine},
    queue,
    style::{
        Attribute, Color as TermColor, Print, ResetColor, SetAttribute, SetBackgroundColor,
        SetForegroundColor,
    },
    terminal::{self, Clear, ClearType},
};
use unicode_width::UnicodeWidthChar;

use crate::core::output::LogEvent;
use crate::core::session::{Session, SessionEvent, SessionState};
use crate::core::term::{AttrFlags, LineId, LineKind, Style, TerminalLine};

/// Console renderer
pub struct ConsoleRenderer<W: Write> {
    out: W,
    /// Emit colors and attributes
    styled: bool,
    /// Columns available for redrawn lines
    width: usize,
    /// Last line printed, the only one that can be redrawn
    last_printed: Option<LineId>,
}

impl ConsoleRenderer<io::Stdout> {
    /// Renderer for the process's stdout, sized to the terminal
    pub fn stdout() -> Self {
        let width = terminal::size().map(|(cols, _)| cols as usize).unwrap_or(80);
        Self::new(io::stdout(), true, width)
    }
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W, styled: bool, width: usize) -> Self {
        Self {
            out,
            styled,
            width: width.max(1),
            last_printed: None,
        }
    }

    /// React to one session event
    pub fn handle(&mut self, event: &SessionEvent, session: &Session) -> io::Result<()> {
        match event {
            SessionEvent::Log(LogEvent::Appended(id)) => {
                if let Some(line) = session.with_log(|log| log.get(*id).cloned()) {
                    self.print_line(&line)?;
                }
            }
            SessionEvent::Log(LogEvent::Replaced(id)) => {
                if let Some(line) = session.with_log(|log| log.get(*id).cloned()) {
                    self.redraw_line(&line)?;
                }
            }
            SessionEvent::Log(LogEvent::Cleared) => self.clear()?,
            SessionEvent::StateChanged(SessionState::Faulted) => {
                tracing::debug!("Renderer saw a faulted run");
            }
            SessionEvent::StateChanged(_) | SessionEvent::InputRequested(_) => {}
        }
        self.out.flush()
    }

    /// Print a line below everything printed so far
    pub fn print_line(&mut self, line: &TerminalLine) -> io::Result<()> {
        self.write_line(line)?;
        queue!(self.out, Print("\r\n"))?;
        self.last_printed = Some(line.id);
        Ok(())
    }

    /// Redraw a replaced line, or print it anew if something followed it
    pub fn redraw_line(&mut self, line: &TerminalLine) -> io::Result<()> {
        if self.last_printed != Some(line.id) {
            return self.print_line(line);
        }
        queue!(
            self.out,
            MoveToPreviousLine(1),
            Clear(ClearType::CurrentLine)
        )?;
        self.print_line(line)
    }

    pub fn clear(&mut self) -> io::Result<()> {
        if self.styled {
            queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
        }
        self.last_printed = None;
        Ok(())
    }

    fn write_line(&mut self, line: &TerminalLine) -> io::Result<()> {
        let mut budget = match line.kind {
            // Redraw targets must stay on one physical row
            LineKind::Overwrite => Some(self.width),
            _ => None,
        };

        for run in &line.runs {
            let text = visible_text(&run.text, &mut budget);
            if text.is_empty() {
                continue;
            }
            if self.styled {
                self.apply_style(&run.style, line.origin)?;
                queue!(self.out, Print(text), SetAttribute(Attribute::Reset), ResetColor)?;
            } else {
                queue!(self.out, Print(text))?;
            }
        }
        Ok(())
    }

    /// Apply run style on top of the default look of the line's origin
    fn apply_style(&mut self, style: &Style, origin: LineKind) -> io::Result<()> {
        let (kind_color, kind_bold) = match origin {
            LineKind::Stderr => (Some(TermColor::Red), false),
            LineKind::System => (Some(TermColor::Blue), true),
            LineKind::Input => (Some(TermColor::Green), true),
            LineKind::Stdout | LineKind::Overwrite => (None, false),
        };

        if kind_bold || style.flags.contains(AttrFlags::BOLD) {
            queue!(self.out, SetAttribute(Attribute::Bold))?;
        }
        if style.flags.contains(AttrFlags::ITALIC) {
            queue!(self.out, SetAttribute(Attribute::Italic))?;
        }
        if style.flags.contains(AttrFlags::UNDERLINE) {
            queue!(self.out, SetAttribute(Attribute::Underlined))?;
        }

        if let Some(fg) = style.fg.map(|c| c.to_crossterm()).or(kind_color) {
            queue!(self.out, SetForegroundColor(fg))?;
        }
        if let Some(bg) = style.bg {
            queue!(self.out, SetBackgroundColor(bg.to_crossterm()))?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Make text safe for a real terminal and clip it to the remaining budget
fn visible_text(text: &str, budget: &mut Option<usize>) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let shown = match ch {
            '\x1b' => '␛',
            '\t' => ' ',
            c if c.is_control() => continue,
            c => c,
        };
        if let Some(left) = budget {
            let w = shown.width().unwrap_or(0);
            if w > *left {
                break;
            }
            *left -= w;
        }
        out.push(shown);
    }
    out
}
