//! rollcall-core: Attendance bookkeeping and object detection.
//!
//! The ledger records the first sighting of each recognized label; the
//! detector turns frames into labels using a YOLO model on ONNX Runtime.

pub mod clock;
pub mod detector;
pub mod ledger;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use detector::{Detector, DetectorError, YoloDetector, YoloOptions};
pub use ledger::{ConfigError, Deadline, EmptyLedgerError, Ledger, RepeatPolicy, Sighting};
pub use types::{BoundingBox, Detection, ExportRow, Notification, Roster, SightingRecord};

/// Default directory for model files: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
