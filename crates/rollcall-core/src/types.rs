use chrono::{NaiveDate, NaiveTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Display format for sighting times (`HH:MM:SS`).
pub const TIME_FORMAT: &str = "%H:%M:%S";
/// Display format for sighting dates (`DD-MM-YYYY`).
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }
}

/// One object recognized by a detector in a single image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// First (or, under last-wins, latest) sighting of a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SightingRecord {
    pub label: String,
    pub time: NaiveTime,
    pub date: NaiveDate,
    /// Fixed at first recording; never recomputed.
    pub late: bool,
}

impl SightingRecord {
    pub fn time_str(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }

    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

/// Owned copy of the ledger contents, in first-seen order.
///
/// Serializes as a JSON object keyed by label:
/// `{"alice": {"time": "08:55:02", "date": "18-10-2026", "late": false}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    records: Vec<SightingRecord>,
}

impl Roster {
    pub(crate) fn new(records: Vec<SightingRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&SightingRecord> {
        self.records.iter().find(|r| r.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SightingRecord> {
        self.records.iter()
    }
}

#[derive(Serialize)]
struct RosterEntry {
    time: String,
    date: String,
    late: bool,
}

impl Serialize for Roster {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(
                &record.label,
                &RosterEntry {
                    time: record.time_str(),
                    date: record.date_str(),
                    late: record.late,
                },
            )?;
        }
        map.end()
    }
}

/// One spreadsheet row. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Name")]
    pub label: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Late")]
    pub late: bool,
}

/// Email payload handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub html_body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str, h: u32, m: u32, s: u32, late: bool) -> SightingRecord {
        SightingRecord {
            label: label.into(),
            time: NaiveTime::from_hms_opt(h, m, s).unwrap(),
            date: NaiveDate::from_ymd_opt(2026, 3, 7).unwrap(),
            late,
        }
    }

    #[test]
    fn test_record_formatting() {
        let r = record("alice", 8, 5, 9, false);
        assert_eq!(r.time_str(), "08:05:09");
        assert_eq!(r.date_str(), "07-03-2026");
    }

    #[test]
    fn test_roster_serializes_as_ordered_map() {
        let roster = Roster::new(vec![
            record("zoe", 8, 0, 0, false),
            record("adam", 9, 30, 0, true),
        ]);
        let json = serde_json::to_string(&roster).unwrap();
        assert_eq!(
            json,
            r#"{"zoe":{"time":"08:00:00","date":"07-03-2026","late":false},"adam":{"time":"09:30:00","date":"07-03-2026","late":true}}"#
        );
    }

    #[test]
    fn test_roster_lookup() {
        let roster = Roster::new(vec![record("bob", 7, 59, 59, false)]);
        assert_eq!(roster.len(), 1);
        assert!(roster.get("bob").is_some());
        assert!(roster.get("alice").is_none());
        assert_eq!(roster.iter().next().map(|r| r.label.as_str()), Some("bob"));
    }

    #[test]
    fn test_bbox_dimensions_never_negative() {
        let b = BoundingBox { x1: 10, y1: 10, x2: 5, y2: 30 };
        assert_eq!(b.width(), 0);
        assert_eq!(b.height(), 20);
    }
}
