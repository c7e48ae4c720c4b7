//! Output log
//!
//! Append-only ordered record of composed terminal lines. The only in-place
//! mutation is replacing a trailing `Overwrite` line, and the only shrinking
//! operation is a full `clear()`.

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::session::SessionEvent;
use super::term::{LineId, LineKind, TerminalLine};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Output log is empty")]
    Empty,

    #[error("Last line is not an overwrite line")]
    NotOverwritable,
}

/// Change notification for renderers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Appended(LineId),
    Replaced(LineId),
    Cleared,
}

/// Ordered log of terminal lines
#[derive(Default)]
pub struct OutputLog {
    lines: Vec<TerminalLine>,
    next_id: u64,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that reports every mutation on `events`
    pub fn with_events(events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    /// Append a line, assigning it a fresh id
    pub fn append(&mut self, mut line: TerminalLine) -> LineId {
        self.next_id += 1;
        let id = LineId(self.next_id);
        line.id = id;
        self.lines.push(line);
        self.notify(LogEvent::Appended(id));
        id
    }

    /// Replace the content of the trailing overwrite line, keeping its id
    pub fn replace_last(&mut self, mut line: TerminalLine) -> Result<LineId, SinkError> {
        let last = self.lines.last_mut().ok_or(SinkError::Empty)?;
        if last.kind != LineKind::Overwrite {
            return Err(SinkError::NotOverwritable);
        }
        let id = last.id;
        line.id = id;
        line.kind = LineKind::Overwrite;
        *last = line;
        self.notify(LogEvent::Replaced(id));
        Ok(id)
    }

    /// Remove every line
    pub fn clear(&mut self) {
        self.lines.clear();
        self.notify(LogEvent::Cleared);
    }

    pub fn lines(&self) -> &[TerminalLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&TerminalLine> {
        self.lines.last()
    }

    /// Look up a line by id (ids increase in log order)
    pub fn get(&self, id: LineId) -> Option<&TerminalLine> {
        self.lines
            .binary_search_by_key(&id, |l| l.id)
            .ok()
            .map(|i| &self.lines[i])
    }

    /// The last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> &[TerminalLine] {
        let start = self.lines.len().saturating_sub(n);
        &self.lines[start..]
    }

    /// Most recent line of the given kind, counting redrawn lines by the
    /// stream they were written to
    pub fn last_of_kind(&self, kind: LineKind) -> Option<&TerminalLine> {
        self.lines
            .iter()
            .rev()
            .find(|l| l.kind == kind || l.origin == kind)
    }

    fn notify(&self, event: LogEvent) {
        if let Some(tx) = &self.events {
            // A dropped renderer is not an error for the log
            let _ = tx.send(SessionEvent::Log(event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(log: &OutputLog) -> Vec<String> {
        log.lines().iter().map(|l| l.text()).collect()
    }

    #[test]
    fn test_append_preserves_order_and_ids() {
        let mut log = OutputLog::new();
        let a = log.append(TerminalLine::plain(LineKind::Stdout, "a"));
        let b = log.append(TerminalLine::plain(LineKind::Stderr, "b"));
        assert!(a < b);
        assert_eq!(texts(&log), vec!["a", "b"]);
        assert_eq!(log.get(b).unwrap().text(), "b");
        assert!(log.get(LineId(99)).is_none());
    }

    #[test]
    fn test_replace_last_requires_overwrite() {
        let mut log = OutputLog::new();
        assert_eq!(
            log.replace_last(TerminalLine::plain(LineKind::Overwrite, "x")),
            Err(SinkError::Empty)
        );

        log.append(TerminalLine::plain(LineKind::Stdout, "plain"));
        assert_eq!(
            log.replace_last(TerminalLine::plain(LineKind::Overwrite, "x")),
            Err(SinkError::NotOverwritable)
        );
        assert_eq!(texts(&log), vec!["plain"]);
    }

    #[test]
    fn test_replace_last_keeps_identity() {
        let mut log = OutputLog::new();
        let id = log.append(TerminalLine::plain(LineKind::Overwrite, "10%"));
        let replaced = log
            .replace_last(TerminalLine::plain(LineKind::Overwrite, "20%"))
            .unwrap();
        assert_eq!(id, replaced);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().text(), "20%");
    }

    #[test]
    fn test_clear_always_empties() {
        let mut log = OutputLog::new();
        log.clear();
        assert!(log.is_empty());

        for i in 0..5 {
            log.append(TerminalLine::plain(LineKind::Stdout, i.to_string()));
        }
        log.clear();
        assert!(log.is_empty());

        // Ids keep increasing after a clear
        let id = log.append(TerminalLine::plain(LineKind::Stdout, "again"));
        assert_eq!(id, LineId(6));
    }

    #[test]
    fn test_tail_and_last_of_kind() {
        let mut log = OutputLog::new();
        log.append(TerminalLine::plain(LineKind::Stderr, "old error"));
        log.append(TerminalLine::plain(LineKind::Stdout, "out"));
        log.append(TerminalLine::plain(LineKind::Stderr, "new error"));
        log.append(TerminalLine::plain(LineKind::System, "sys"));

        assert_eq!(log.last_of_kind(LineKind::Stderr).unwrap().text(), "new error");
        let tail: Vec<String> = log.tail(2).iter().map(|l| l.text()).collect();
        assert_eq!(tail, vec!["new error", "sys"]);
        assert_eq!(log.tail(10).len(), 4);
    }

    #[test]
    fn test_last_of_kind_sees_redrawn_stderr() {
        let mut log = OutputLog::new();
        log.append(TerminalLine::plain(LineKind::Stderr, "old error"));
        log.append(
            TerminalLine::plain(LineKind::Overwrite, "retrying 3/3").with_origin(LineKind::Stderr),
        );
        log.append(TerminalLine::plain(LineKind::Stdout, "out"));

        let last = log.last_of_kind(LineKind::Stderr).unwrap();
        assert_eq!(last.text(), "retrying 3/3");
        assert_eq!(last.kind, LineKind::Overwrite);
        assert_eq!(
            log.last_of_kind(LineKind::Overwrite).unwrap().text(),
            "retrying 3/3"
        );
    }

    #[test]
    fn test_events_reported() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut log = OutputLog::with_events(tx);
        let id = log.append(TerminalLine::plain(LineKind::Overwrite, "a"));
        log.replace_last(TerminalLine::plain(LineKind::Overwrite, "b")).unwrap();
        log.clear();

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Log(LogEvent::Appended(id)));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Log(LogEvent::Replaced(id)));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Log(LogEvent::Cleared));
    }
}
