//! Object detection via ONNX Runtime.
//!
//! [`Detector`] is the seam the rest of the workspace depends on;
//! [`YoloDetector`] implements it for YOLOv8-format exports whose single
//! output is `[1, 4 + classes, anchors]` (cx, cy, w, h, class scores).

use crate::types::{BoundingBox, Detection};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YOLO_INPUT_SIZE: u32 = 640;
/// Letterbox fill (114 / 255), the value YOLO models are trained with.
const YOLO_PAD_VALUE: f32 = 114.0 / 255.0;
const YOLO_BOX_ATTRS: usize = 4;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("labels file unreadable: {path}: {source}")]
    Labels {
        path: String,
        source: std::io::Error,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns an image into labelled detections.
pub trait Detector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Tuning knobs for [`YoloDetector`].
#[derive(Debug, Clone, Copy)]
pub struct YoloOptions {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub intra_threads: usize,
}

impl Default for YoloOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            intra_threads: 2,
        }
    }
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }
}

/// Candidate box in source-image float coordinates, before NMS.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    class_id: usize,
}

/// YOLOv8 detector backed by an ONNX Runtime session.
pub struct YoloDetector {
    session: Session,
    names: Vec<String>,
    input_size: u32,
    options: YoloOptions,
}

impl YoloDetector {
    /// Load the ONNX model and its class-name list (one name per line).
    pub fn load(
        model_path: &str,
        labels_path: &str,
        options: YoloOptions,
    ) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let names = load_labels(labels_path)?;

        let session = Session::builder()?
            .with_intra_threads(options.intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            classes = names.len(),
            "loaded YOLO model"
        );

        if session.outputs().is_empty() {
            return Err(DetectorError::InferenceFailed(
                "model declares no outputs".into(),
            ));
        }

        Ok(Self {
            session,
            names,
            input_size: YOLO_INPUT_SIZE,
            options,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Letterbox the frame into a normalized NCHW tensor.
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let size = self.input_size as usize;
        let letterbox = Letterbox::fit(image.width(), image.height(), self.input_size);

        let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, self.input_size);
        let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, self.input_size);
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), YOLO_PAD_VALUE);
        let off_x = letterbox.pad_x as usize;
        let off_y = letterbox.pad_y as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x as usize + off_x, y as usize + off_y);
            if tx >= size || ty >= size {
                continue;
            }
            let [r, g, b] = pixel.0;
            tensor[[0, 0, ty, tx]] = r as f32 / 255.0;
            tensor[[0, 1, ty, tx]] = g as f32 / 255.0;
            tensor[[0, 2, ty, tx]] = b as f32 / 255.0;
        }

        (tensor, letterbox)
    }

    fn label_for(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Detector for YoloDetector {
    /// Detect objects in an RGB frame, sorted by descending confidence.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = self.preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, preds) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("output tensor: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let [_, attrs, anchors] = dims[..] else {
            return Err(DetectorError::InferenceFailed(format!(
                "expected [1, 4 + classes, anchors] output, got {dims:?}"
            )));
        };
        if attrs <= YOLO_BOX_ATTRS {
            return Err(DetectorError::InferenceFailed(format!(
                "output has {attrs} attributes per anchor; no class scores"
            )));
        }

        let candidates = decode_predictions(
            preds,
            anchors,
            attrs - YOLO_BOX_ATTRS,
            &letterbox,
            self.options.confidence_threshold,
        );
        drop(outputs);
        let kept = nms(candidates, self.options.iou_threshold);

        let (w, h) = (image.width() as f32, image.height() as f32);
        let detections: Vec<Detection> = kept
            .into_iter()
            .map(|c| Detection {
                label: self.label_for(c.class_id),
                confidence: c.confidence,
                bbox: BoundingBox {
                    x1: c.x1.clamp(0.0, w).round() as i32,
                    y1: c.y1.clamp(0.0, h).round() as i32,
                    x2: c.x2.clamp(0.0, w).round() as i32,
                    y2: c.y2.clamp(0.0, h).round() as i32,
                },
            })
            .collect();

        tracing::trace!(count = detections.len(), "detections decoded");
        Ok(detections)
    }
}

fn load_labels(path: &str) -> Result<Vec<String>, DetectorError> {
    let text = std::fs::read_to_string(path).map_err(|source| DetectorError::Labels {
        path: path.to_string(),
        source,
    })?;
    Ok(parse_labels(&text))
}

/// One class name per line; blank lines and `#` comments are skipped.
fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Decode a channel-major `[4 + classes, anchors]` prediction block.
fn decode_predictions(
    preds: &[f32],
    anchors: usize,
    classes: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let at = |attr: usize, anchor: usize| preds.get(attr * anchors + anchor).copied().unwrap_or(0.0);

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let mut class_id = 0;
        let mut confidence = f32::NEG_INFINITY;
        for c in 0..classes {
            let score = at(YOLO_BOX_ATTRS + c, a);
            if score > confidence {
                confidence = score;
                class_id = c;
            }
        }
        if confidence < threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
        candidates.push(Candidate {
            x1: (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y1: (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
            x2: (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y2: (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale,
            confidence,
            class_id,
        });
    }
    candidates
}

/// Per-class Non-Maximum Suppression. Output is sorted by confidence.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i]);

        for j in (i + 1)..candidates.len() {
            if suppressed[j] || candidates[j].class_id != candidates[i].class_id {
                continue;
            }
            if iou(&candidates[i], &candidates[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
