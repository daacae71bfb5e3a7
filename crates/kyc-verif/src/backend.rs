//! Verification backend seam
//!
//! The inference pipeline (document detection, OCR, rectification) is
//! pluggable behind [`VerificationBackend`]. The engine validates input,
//! calls the backend once per `process` call and post-processes whatever
//! targets it reports.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::KycConfig;
use crate::error::Result;
use crate::input::Frame;

/// Same-kind targets overlapping more than this are duplicates.
pub const DUPLICATE_IOU_THRESHOLD: f32 = 0.5;

/// Bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Calculate intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One verification target (document or face) found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viz {
    /// Target kind, e.g. "passport", "id_card", "face"
    pub kind: String,
    /// Confidence score 0.0-1.0
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Extracted fields (OCR output, verification verdicts)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Viz {
    pub fn new(kind: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            kind: kind.into(),
            confidence,
            bbox,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Inference pipeline evaluating one frame at a time.
///
/// Implementations are shared by every worker thread and must tolerate
/// concurrent `evaluate` calls.
pub trait VerificationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Load models and allocate resources for a new session.
    fn prepare(&self, _config: &KycConfig) -> Result<()> {
        Ok(())
    }

    /// Evaluate one frame and report zero or more targets.
    fn evaluate(&self, frame: &Frame, config: &KycConfig) -> Result<Vec<Viz>>;

    /// Release session resources. Called once every evaluation has finished.
    fn release(&self) {}
}

/// Backend used when no inference pipeline is plugged in.
///
/// Validates sessions and frames but ships no models, so it never
/// reports a target.
#[derive(Debug, Default)]
pub struct BaselineBackend;

impl VerificationBackend for BaselineBackend {
    fn name(&self) -> &str {
        "baseline"
    }

    fn prepare(&self, config: &KycConfig) -> Result<()> {
        if !Path::new(&config.assets_folder).is_dir() {
            warn!(
                "Assets folder '{}' not found, no models will be loaded",
                config.assets_folder
            );
        }
        Ok(())
    }

    fn evaluate(&self, frame: &Frame, _config: &KycConfig) -> Result<Vec<Viz>> {
        debug!(
            "Evaluated {}x{} {:?} frame (orientation {}), no detection model loaded",
            frame.width, frame.height, frame.image_type, frame.orientation
        );
        Ok(Vec::new())
    }
}

/// Threshold, sort and de-duplicate backend output.
pub fn postprocess(vizs: Vec<Viz>, detect_threshold: f64) -> Vec<Viz> {
    // Filter by confidence threshold
    let mut filtered: Vec<Viz> = vizs
        .into_iter()
        .filter(|v| v.confidence.is_finite() && f64::from(v.confidence) >= detect_threshold)
        .collect();

    // Sort by confidence (descending)
    filtered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Viz> = Vec::with_capacity(filtered.len());
    for viz in filtered {
        let duplicate = keep
            .iter()
            .any(|k| k.kind == viz.kind && k.bbox.iou(&viz.bbox) > DUPLICATE_IOU_THRESHOLD);
        if !duplicate {
            keep.push(viz);
        }
    }
    keep
}
