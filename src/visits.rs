//! Per-session visit counting.
//!
//! The counter lives in two session values: `visits` (decimal string) and
//! `last_visit` (`%Y-%m-%d %H:%M:%S%.6f`). A visit at least one whole day after
//! the stored `last_visit` bumps the counter and moves `last_visit` to now; any
//! earlier visit resets the counter to 1 and keeps `last_visit`.

use chrono::{Local, NaiveDateTime};
use tracing::warn;

use crate::session::Session;

pub const VISITS_KEY: &str = "visits";
pub const LAST_VISIT_KEY: &str = "last_visit";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitState {
    pub visits: u32,
    pub last_visit: NaiveDateTime,
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored `last_visit`. Accepts the timestamp with or without the
/// fractional-seconds suffix.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), PARSE_FORMAT).ok()
}

/// Pure transition from the stored state to the state after a visit at `now`.
pub fn next_state(previous: &VisitState, now: NaiveDateTime) -> VisitState {
    if (now - previous.last_visit).num_days() > 0 {
        VisitState {
            visits: previous.visits.saturating_add(1),
            last_visit: now,
        }
    } else {
        VisitState {
            visits: 1,
            last_visit: previous.last_visit,
        }
    }
}

/// Read the stored state, falling back to defaults for missing or
/// unreadable values.
pub fn stored_state(session: &Session, now: NaiveDateTime) -> VisitState {
    let visits = match session.get(VISITS_KEY) {
        Some(raw) => raw.trim().parse::<u32>().ok().filter(|v| *v > 0).unwrap_or_else(|| {
            warn!(value = raw, "discarding unreadable visit counter");
            1
        }),
        None => 1,
    };
    let last_visit = match session.get(LAST_VISIT_KEY) {
        Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
            warn!(value = raw, "discarding unreadable last_visit timestamp");
            now
        }),
        None => now,
    };
    VisitState { visits, last_visit }
}

/// Update the session for a visit at `now` and return the new state.
pub fn track_visit_at(session: &mut Session, now: NaiveDateTime) -> VisitState {
    let previous = stored_state(session, now);
    let next = next_state(&previous, now);
    session.insert(VISITS_KEY, next.visits.to_string());
    session.insert(LAST_VISIT_KEY, format_timestamp(next.last_visit));
    next
}

/// Update the session for a visit happening now (local wall clock).
pub fn track_visit(session: &mut Session) -> VisitState {
    track_visit_at(session, Local::now().naive_local())
}
