//! Timestamp utilities
//!
//! Ledger timestamps are local time with offset, written as RFC 3339 with
//! microsecond precision so that rows appended within the same second still
//! sort in the order they were written.

use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone};
use std::sync::Mutex;

/// Format used for every timestamp the ledgers write
const LEDGER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Legacy format accepted on read (naive, local)
const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current local timestamp
pub fn now() -> DateTime<Local> {
    Local::now()
}

/// Render a timestamp for a ledger cell
pub fn format_timestamp(ts: &DateTime<Local>) -> String {
    ts.format(LEDGER_FORMAT).to_string()
}

/// Parse a ledger timestamp cell.
///
/// Accepts RFC 3339 and the older `YYYY-MM-DD HH:MM:SS` form. Empty cells
/// and unparseable values yield `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(raw, LEGACY_FORMAT).ok()?;
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(ts) => Some(ts),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

/// Clock whose readings never go backwards within a process.
///
/// Wall-clock adjustments (NTP slews, DST) must not reorder SendAttempt rows,
/// so each reading is at least one microsecond after the previous one.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Local>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Local> {
        let current = now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = match *last {
            Some(prev) if current <= prev => prev + chrono::Duration::microseconds(1),
            _ => current,
        };
        *last = Some(next);
        next
    }
}
