//! Spreadsheet export of the attendance roster as CSV.

use chrono::NaiveDate;
use rollcall_core::ExportRow;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("export directory unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Writes `attendance_<YYYY-MM-DD>.csv` files into one directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(date: NaiveDate) -> String {
        format!("attendance_{}.csv", date.format("%Y-%m-%d"))
    }

    /// Write `rows` under the file name for `date`, replacing any earlier export that day.
    pub fn write(&self, date: NaiveDate, rows: &[ExportRow]) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(date));

        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        tracing::info!(path = %path.display(), rows = rows.len(), "attendance exported");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: &str, time: &str, late: bool) -> ExportRow {
        ExportRow {
            label: label.into(),
            date: "18-10-2026".into(),
            time: time.into(),
            late,
        }
    }

    #[test]
    fn test_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        assert_eq!(CsvExporter::file_name(date), "attendance_2026-02-03.csv");
    }

    #[test]
    fn test_write_rows_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path().join("exports"));
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        let path = exporter
            .write(date, &[row("alice", "08:10:00", false), row("bob, jr", "09:20:00", true)])
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "attendance_2026-10-18.csv");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Name,Date,Time,Late\n\
             alice,18-10-2026,08:10:00,false\n\
             \"bob, jr\",18-10-2026,09:20:00,true\n"
        );
    }

    #[test]
    fn test_same_day_export_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        exporter.write(date, &[row("alice", "08:10:00", false), row("bob", "08:11:00", false)]).unwrap();
        let path = exporter.write(date, &[row("carol", "08:12:00", false)]).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("carol"));
    }
}
