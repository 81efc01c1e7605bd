//! Trading-session gate.
//!
//! The session is a fixed local time-of-day window. There is no timezone
//! conversion and no holiday calendar: the process clock is trusted.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use std::fmt;
use std::time::Duration;

/// Default session open (09:15 local).
pub const DEFAULT_OPEN: &str = "09:15";
/// Default session close (15:30 local).
pub const DEFAULT_CLOSE: &str = "15:30";

/// How long the worker sleeps before re-checking a closed session.
pub const OFF_SESSION_SLEEP: Duration = Duration::from_secs(3600);

/// A daily `[open, close]` window, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    open: NaiveTime,
    close: NaiveTime,
}

impl SessionWindow {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self> {
        if open > close {
            bail!("Session open {open} is after close {close}");
        }
        Ok(Self { open, close })
    }

    /// Parse `HH:MM` or `HH:MM:SS` boundaries.
    pub fn parse(open: &str, close: &str) -> Result<Self> {
        Self::new(parse_time(open)?, parse_time(close)?)
    }

    /// Whether a fetch cycle should run at `now`.
    pub fn should_run_now(&self, now: NaiveTime) -> bool {
        self.open <= now && now <= self.close
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for SessionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", self.open.format("%H:%M:%S"), self.close.format("%H:%M:%S"))
    }
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .with_context(|| format!("Invalid session time: {s:?} (expected HH:MM or HH:MM:SS)"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
