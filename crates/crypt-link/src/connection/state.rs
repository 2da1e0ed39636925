//! Connection lifecycle states.
//!
//! ```text
//! Closed ──connect()──► Connecting ──open──► Open
//!   ▲                       │                  │
//!   │                 error/close        close/error
//!   └───────────────────────┴──────────────────┘
//! ```
//!
//! An unclean transition back to `Closed` schedules one reconnect after a
//! flat delay; `disconnect()` is terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseKind {
    /// Caller-initiated via `disconnect()`, or superseded by a newer connection
    Clean,
    /// Anything else; triggers the reconnect policy
    Unclean,
}
