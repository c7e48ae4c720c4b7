//! Line compositor
//!
//! Turns flushed stream chunks into terminal lines. Newlines complete a
//! line, carriage returns move the cursor back to the start of the current
//! line so that following text overwrites it. A line that saw a carriage
//! return is shown immediately as an `Overwrite` line and redrawn in place;
//! a plain partial line is held back until it is completed or flushed.

use super::decoder::{decode, push_run};
use super::style::{LineId, LineKind, Style, StyledRun, TerminalLine};
use crate::core::output::OutputLog;

/// The line the cursor is currently on
#[derive(Debug)]
struct CurrentLine {
    stream: LineKind,
    runs: Vec<StyledRun>,
    /// Saw a carriage return, redraws in place
    overwrite: bool,
    /// Cursor is at column 0 after a carriage return
    returned: bool,
    /// Already visible in the log under this id
    committed: Option<LineId>,
}

impl CurrentLine {
    fn new(stream: LineKind) -> Self {
        Self {
            stream,
            runs: Vec::new(),
            overwrite: false,
            returned: false,
            committed: None,
        }
    }

    fn write(&mut self, text: &str, style: Style) {
        if text.is_empty() {
            return;
        }
        if self.returned {
            self.runs.clear();
            self.returned = false;
        }
        push_run(&mut self.runs, text, style);
    }

    fn carriage_return(&mut self) {
        self.overwrite = true;
        self.returned = true;
    }

    fn kind(&self) -> LineKind {
        if self.overwrite {
            LineKind::Overwrite
        } else {
            self.stream
        }
    }
}

/// Composes stream output into the output log
#[derive(Debug)]
pub struct Compositor {
    current: Option<CurrentLine>,
    /// Tag table-like lines for fixed-width rendering
    monospace_hint: bool,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            current: None,
            monospace_hint: true,
        }
    }

    pub fn set_monospace_hint(&mut self, enabled: bool) {
        self.monospace_hint = enabled;
    }

    fn compose(&self, kind: LineKind, runs: Vec<StyledRun>) -> TerminalLine {
        let mut line = TerminalLine::new(kind, runs);
        line.monospace &= self.monospace_hint;
        line
    }

    fn compose_current(&self, current: &CurrentLine) -> TerminalLine {
        self.compose(current.kind(), current.runs.clone())
            .with_origin(current.stream)
    }

    /// Feed one flushed chunk from a program stream (stdout or stderr)
    pub fn feed(&mut self, stream: LineKind, chunk: &str, log: &mut OutputLog) {
        if self.current.as_ref().is_some_and(|c| c.stream != stream) {
            self.flush(log);
        }

        let decoded = decode(chunk);
        let mut line = self
            .current
            .take()
            .unwrap_or_else(|| CurrentLine::new(stream));

        for run in &decoded.runs {
            let mut rest = run.text.as_str();
            while let Some(i) = rest.find(|c: char| c == '\n' || c == '\r') {
                line.write(&rest[..i], run.style);
                if rest.as_bytes()[i] == b'\r' {
                    line.carriage_return();
                } else {
                    self.commit(&mut line, log);
                    line = CurrentLine::new(stream);
                }
                rest = &rest[i + 1..];
            }
            line.write(rest, run.style);
        }

        if line.overwrite {
            self.commit(&mut line, log);
            self.current = Some(line);
        } else if !line.runs.is_empty() {
            self.current = Some(line);
        }
    }

    /// Commit any held-back partial line
    pub fn flush(&mut self, log: &mut OutputLog) {
        if let Some(line) = self.current.take() {
            if line.committed.is_none() && !line.runs.is_empty() {
                log.append(self.compose_current(&line));
            }
        }
    }

    /// Append a complete line after flushing pending output
    pub fn push_line(&mut self, kind: LineKind, text: &str, log: &mut OutputLog) -> LineId {
        self.flush(log);
        let mut line = TerminalLine::plain(kind, text);
        line.monospace &= self.monospace_hint;
        log.append(line)
    }

    /// Forget any partial line (used when the log is cleared)
    pub fn reset(&mut self) {
        self.current = None;
    }

    fn commit(&self, line: &mut CurrentLine, log: &mut OutputLog) {
        let composed = self.compose_current(line);
        let still_last = line.committed.is_some()
            && log.last().map(|l| l.id) == line.committed
            && composed.kind == LineKind::Overwrite;

        if still_last {
            match log.replace_last(composed.clone()) {
                Ok(_) => return,
                Err(e) => tracing::warn!("Overwrite target lost: {}", e),
            }
        }
        line.committed = Some(log.append(composed));
    }
}
