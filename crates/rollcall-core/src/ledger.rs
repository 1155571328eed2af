//! In-memory attendance ledger.
//!
//! Maps each recognized label to exactly one [`SightingRecord`], kept in
//! first-seen order. All operations take one internal lock for a short,
//! allocation-only critical section, so the ledger can be shared via `Arc`
//! between the detection engine and HTTP handlers.

use crate::types::{ExportRow, Notification, Roster, SightingRecord};
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const NOTIFICATION_SUBJECT: &str = "Attendance List";

/// Notification or export requested while no sightings are recorded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("attendance ledger is empty")]
pub struct EmptyLedgerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid deadline {0:?}: expected HH:MM")]
    InvalidDeadline(String),
    #[error("invalid repeat policy {0:?}: expected first-wins or last-wins")]
    InvalidPolicy(String),
}

/// What to do when a label that already has a record is seen again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatPolicy {
    /// Keep the first sighting; ignore later ones.
    #[default]
    FirstWins,
    /// Overwrite time and date with the latest sighting. Lateness stays.
    LastWins,
}

impl FromStr for RepeatPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "first-wins" | "first_wins" => Ok(Self::FirstWins),
            "last-wins" | "last_wins" => Ok(Self::LastWins),
            other => Err(ConfigError::InvalidPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for RepeatPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstWins => "first-wins",
            Self::LastWins => "last-wins",
        })
    }
}

/// Time of day after which a first sighting counts as late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(NaiveTime);

impl Deadline {
    /// Strictly later than the deadline, compared at whole-second precision.
    pub fn is_late(&self, observed: NaiveTime) -> bool {
        let observed = observed.with_nanosecond(0).unwrap_or(observed);
        observed > self.0
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl FromStr for Deadline {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| ConfigError::InvalidDeadline(s.to_string()))
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// Effect of one `record_sighting` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// First sighting of the label.
    Recorded { late: bool },
    /// Repeat sighting overwrote time/date (last-wins).
    Updated,
    /// Repeat sighting dropped (first-wins).
    Ignored,
}

#[derive(Default)]
struct Entries {
    records: Vec<SightingRecord>,
    index: HashMap<String, usize>,
}

/// Attendance ledger shared by the frame pipeline and HTTP handlers.
pub struct Ledger {
    deadline: Deadline,
    policy: RepeatPolicy,
    entries: Mutex<Entries>,
}

impl Ledger {
    pub fn new(deadline: Deadline, policy: RepeatPolicy) -> Self {
        Self {
            deadline,
            policy,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn policy(&self) -> RepeatPolicy {
        self.policy
    }

    // Every mutation leaves `Entries` consistent, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one sighting of `label` at `observed_at`.
    pub fn record_sighting(&self, label: &str, observed_at: NaiveDateTime) -> Sighting {
        let mut entries = self.lock();
        self.apply(&mut entries, label, observed_at)
    }

    /// Record every distinct label of one frame under a single lock.
    ///
    /// Returns the outcome per distinct label, in first-occurrence order.
    pub fn record_frame<'a, I>(&self, labels: I, observed_at: NaiveDateTime) -> Vec<(String, Sighting)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        let mut entries = self.lock();
        labels
            .into_iter()
            .filter(|label| seen.insert(*label))
            .map(|label| (label.to_string(), self.apply(&mut entries, label, observed_at)))
            .collect()
    }

    fn apply(&self, entries: &mut Entries, label: &str, observed_at: NaiveDateTime) -> Sighting {
        if let Some(&idx) = entries.index.get(label) {
            return match self.policy {
                RepeatPolicy::FirstWins => Sighting::Ignored,
                RepeatPolicy::LastWins => {
                    let record = &mut entries.records[idx];
                    record.time = observed_at.time();
                    record.date = observed_at.date();
                    Sighting::Updated
                }
            };
        }

        let late = self.deadline.is_late(observed_at.time());
        entries.index.insert(label.to_string(), entries.records.len());
        entries.records.push(SightingRecord {
            label: label.to_string(),
            time: observed_at.time(),
            date: observed_at.date(),
            late,
        });
        Sighting::Recorded { late }
    }

    /// Owned copy of all records in first-seen order.
    pub fn snapshot(&self) -> Roster {
        Roster::new(self.lock().records.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Clear all records. Returns how many were removed.
    pub fn reset(&self) -> usize {
        let mut entries = self.lock();
        let removed = entries.records.len();
        entries.records.clear();
        entries.index.clear();
        removed
    }

    /// One line per label: `alice - Time: 08:55:02 | Date: 18-10-2026 | Late: false`.
    pub fn to_notification_text(&self) -> Result<String, EmptyLedgerError> {
        let roster = self.non_empty_snapshot()?;
        Ok(notification_lines(&roster).join("\n"))
    }

    /// Subject and HTML body for the attendance email.
    pub fn notification(&self) -> Result<Notification, EmptyLedgerError> {
        let roster = self.non_empty_snapshot()?;
        let lines: Vec<String> = notification_lines(&roster)
            .iter()
            .map(|l| escape_html(l))
            .collect();
        Ok(Notification {
            subject: NOTIFICATION_SUBJECT.to_string(),
            html_body: format!(
                "<h1>{NOTIFICATION_SUBJECT}</h1><ul>{}</ul>",
                lines.join("<br>")
            ),
        })
    }

    /// Rows for tabular export, in first-seen order.
    pub fn to_export_rows(&self) -> Result<Vec<ExportRow>, EmptyLedgerError> {
        let roster = self.non_empty_snapshot()?;
        Ok(roster
            .iter()
            .map(|r| ExportRow {
                label: r.label.clone(),
                date: r.date_str(),
                time: r.time_str(),
                late: r.late,
            })
            .collect())
    }

    fn non_empty_snapshot(&self) -> Result<Roster, EmptyLedgerError> {
        let roster = self.snapshot();
        if roster.is_empty() {
            return Err(EmptyLedgerError);
        }
        Ok(roster)
    }
}

fn notification_lines(roster: &Roster) -> Vec<String> {
    roster
        .iter()
        .map(|r| {
            format!(
                "{} - Time: {} | Date: {} | Late: {}",
                r.label,
                r.time_str(),
                r.date_str(),
                r.late
            )
        })
        .collect()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
