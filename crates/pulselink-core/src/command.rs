//! Console commands and the connectivity intent flag they drive

use core::sync::atomic::{AtomicBool, Ordering};

/// One parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `ONLINE`, `OFFLINE` or `SET_CONNECTED true|false`
    SetConnected(bool),
    /// Blank line, ignored
    Empty,
    /// Anything else, carried trimmed for the diagnostic notice
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Parse a console line. Keywords are case-insensitive and surrounding
    /// whitespace is ignored.
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if line.eq_ignore_ascii_case("ONLINE") {
            return Self::SetConnected(true);
        }
        if line.eq_ignore_ascii_case("OFFLINE") {
            return Self::SetConnected(false);
        }

        let mut words = line.split_whitespace();
        if let (Some(verb), Some(arg), None) = (words.next(), words.next(), words.next())
            && verb.eq_ignore_ascii_case("SET_CONNECTED")
        {
            if arg.eq_ignore_ascii_case("true") {
                return Self::SetConnected(true);
            }
            if arg.eq_ignore_ascii_case("false") {
                return Self::SetConnected(false);
            }
        }
        Self::Unknown(line)
    }
}

/// Operator intent to be online.
///
/// Written by the command interface (possibly from another thread or an
/// interrupt) and read by the control loop once per iteration. Every
/// [`Self::set`] also latches a pending command, so a repeated `ONLINE` is
/// seen even though the value did not change. Commands arriving within one
/// iteration collapse to the last one.
pub struct ConnectivityIntent {
    online: AtomicBool,
    pending: AtomicBool,
}

impl ConnectivityIntent {
    pub const fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            pending: AtomicBool::new(false),
        }
    }

    pub fn set(&self, online: bool) {
        critical_section::with(|_| {
            self.online.store(online, Ordering::Release);
            self.pending.store(true, Ordering::Release);
        });
    }

    pub fn get(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Consume the pending command, if any, returning the commanded value.
    pub fn take_command(&self) -> Option<bool> {
        critical_section::with(|_| {
            self.pending
                .swap(false, Ordering::AcqRel)
                .then(|| self.online.load(Ordering::Acquire))
        })
    }
}

impl Default for ConnectivityIntent {
    fn default() -> Self {
        Self::new(false)
    }
}
