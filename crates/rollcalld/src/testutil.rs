//! Shared fixtures for unit tests.

use chrono::NaiveDate;
use rollcall_core::{
    BoundingBox, Detection, Detector, DetectorError, FixedClock, Ledger, RepeatPolicy,
};
use rollcall_hw::Frame;
use std::sync::Arc;

/// Returns the same labels for every image.
pub struct StubDetector {
    labels: Vec<String>,
    fail: bool,
}

impl StubDetector {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            labels: Vec::new(),
            fail: true,
        }
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, _image: &image::RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if self.fail {
            return Err(DetectorError::InferenceFailed("stub failure".into()));
        }
        Ok(self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| Detection {
                label: label.clone(),
                confidence: 0.9,
                bbox: BoundingBox {
                    x1: i as i32,
                    y1: 0,
                    x2: i as i32 + 4,
                    y2: 4,
                },
            })
            .collect())
    }
}

pub fn fixed_clock(h: u32, m: u32, s: u32) -> FixedClock {
    FixedClock::new(
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap(),
    )
}

pub fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::new("09:00".parse().unwrap(), RepeatPolicy::FirstWins))
}

pub fn solid_frame() -> Frame {
    Frame {
        image: image::RgbImage::from_pixel(8, 8, image::Rgb([40, 80, 120])),
        sequence: 1,
    }
}

/// PNG-encoded 4x4 still for upload tests.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Labels currently in the ledger, in first-seen order.
pub fn recorded_labels(ledger: &Ledger) -> Vec<String> {
    ledger.snapshot().iter().map(|r| r.label.clone()).collect()
}
