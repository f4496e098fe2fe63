use serde::{Deserialize, Serialize};

/// Longest single session that can be credited to a task (8 hours).
pub const MAX_SESSION_MS: i64 = 8 * 60 * 60 * 1000;

/// One contiguous interval during which a task's timer was running.
///
/// Instants are epoch milliseconds. `end_time` and `duration` are absent
/// while the interval is still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl TimeEntry {
    pub fn open(start_time: i64) -> Self {
        Self {
            start_time,
            end_time: None,
            duration: None,
        }
    }

    pub fn closed(start_time: i64, duration: i64) -> Self {
        Self {
            start_time,
            end_time: Some(start_time + duration),
            duration: Some(duration),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Time-tracking state embedded in every task.
///
/// `total_time_spent` only ever grows, and only when a session is closed.
/// While `is_active` is set, `last_started` is present and the last entry
/// is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeTracking {
    #[serde(default)]
    pub total_time_spent: i64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started: Option<i64>,
    #[serde(default)]
    pub time_entries: Vec<TimeEntry>,
}

/// Milliseconds creditable for a session that started at `start` and is
/// observed at `now`.
pub fn session_credit(start: i64, now: i64) -> i64 {
    (now - start).clamp(0, MAX_SESSION_MS)
}

impl TimeTracking {
    /// Open a new session at `now`.
    ///
    /// Returns `false` without touching anything if a session is already open.
    pub fn start(&mut self, now: i64) -> bool {
        if self.is_active {
            return false;
        }
        self.is_active = true;
        self.last_started = Some(now);
        self.time_entries.push(TimeEntry::open(now));
        true
    }

    /// Close the open session at `now` and credit it to the total.
    ///
    /// Returns the credited duration, or `None` if nothing was running.
    pub fn close(&mut self, now: i64) -> Option<i64> {
        if !self.is_active {
            return None;
        }

        let open_start = self
            .time_entries
            .last()
            .filter(|entry| entry.is_open())
            .map(|entry| entry.start_time);
        let start = open_start.or(self.last_started).unwrap_or(now);
        let duration = session_credit(start, now);

        match self.time_entries.last_mut() {
            Some(entry) if entry.is_open() => {
                entry.end_time = Some(start + duration);
                entry.duration = Some(duration);
            }
            _ => self.time_entries.push(TimeEntry::closed(start, duration)),
        }

        self.total_time_spent += duration;
        self.is_active = false;
        self.last_started = None;
        Some(duration)
    }

    /// Milliseconds the open session has been running at `now`, capped.
    pub fn running_for(&self, now: i64) -> Option<i64> {
        if !self.is_active {
            return None;
        }
        self.last_started.map(|started| session_credit(started, now))
    }

    /// Committed total plus the live portion of the open session.
    ///
    /// Never writes; safe to call on every display tick.
    pub fn elapsed(&self, now: i64) -> i64 {
        self.total_time_spent + self.running_for(now).unwrap_or(0)
    }

    /// Whether the open session has reached the per-session cap at `now`.
    pub fn session_expired(&self, now: i64) -> bool {
        self.running_for(now)
            .is_some_and(|running| running >= MAX_SESSION_MS)
    }

    /// Mark a session as running since `started_at`, reusing a trailing
    /// open entry when there is one.
    pub fn force_active(&mut self, started_at: i64) {
        self.is_active = true;
        self.last_started = Some(started_at);
        match self.time_entries.last_mut() {
            Some(entry) if entry.is_open() => entry.start_time = started_at,
            _ => self.time_entries.push(TimeEntry::open(started_at)),
        }
    }

    /// Restore the active/open-entry invariant after merging two snapshots.
    ///
    /// An inactive tracker keeps no open entry: that interval was never
    /// credited. An active tracker without a start time is treated as stopped.
    pub fn normalize(&mut self) {
        if self.is_active {
            let open_start = self
                .time_entries
                .last()
                .filter(|entry| entry.is_open())
                .map(|entry| entry.start_time);
            match self.last_started.or(open_start) {
                Some(started_at) => self.force_active(started_at),
                None => self.is_active = false,
            }
        }

        if !self.is_active {
            self.last_started = None;
            while self.time_entries.last().is_some_and(TimeEntry::is_open) {
                self.time_entries.pop();
            }
        }
    }
}
