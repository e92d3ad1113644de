use crate::frame::{ChannelOrder, FaceRegion, Image};
use crate::runtime::OnnxRuntime;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Value;
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runtime::RuntimeError),
}

/// A face found by a detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub region: FaceRegion,
    pub confidence: f32,
}

/// Locates candidate face regions. Zero or many results are both valid.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &Image) -> Result<Vec<Detection>, DetectionError>;
}

/// Which detection to crop to when a detector reports several faces.
///
/// The core never picks on its own; callers pass one of these explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionSelection {
    #[default]
    Largest,
    MostConfident,
    First,
}

impl RegionSelection {
    pub fn select<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        match self {
            RegionSelection::First => detections.first(),
            RegionSelection::Largest => detections.iter().max_by_key(|d| d.region.area()),
            RegionSelection::MostConfident => detections.iter().max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
    }
}

impl FromStr for RegionSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "largest" => Ok(RegionSelection::Largest),
            "confident" | "most-confident" => Ok(RegionSelection::MostConfident),
            "first" => Ok(RegionSelection::First),
            other => Err(format!(
                "unknown region selection '{}': expected largest, most-confident or first",
                other
            )),
        }
    }
}

const INPUT_SIZE: u32 = 640;

/// Feature pyramid strides of SCRFD-style detectors
const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Face box in detector input space before clamping to the image
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// SCRFD-style anchor-based face detector running on ONNX Runtime.
///
/// Expects score outputs for each stride at indices 0-2 and box distance
/// outputs at 3-5; landmark outputs, if present, are ignored.
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    input_name: String,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl OnnxFaceDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        runtime: &OnnxRuntime,
        confidence_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self, DetectionError> {
        let session = runtime.create_session(model_path)?;
        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| DetectionError::ModelLoad("model declares no inputs".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            confidence_threshold,
            nms_threshold,
        })
    }

    /// Resize to the square detector input, normalize to roughly [-1, 1], NCHW
    fn preprocess(image: &Image) -> ([usize; 4], Vec<f32>) {
        let rgb = image.to_order(ChannelOrder::Rgb);
        let resized = imageops::resize(rgb.raster(), INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        let size = INPUT_SIZE as usize;
        let mut data = vec![0.0f32; 3 * size * size];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * size + x as usize;
            for c in 0..3 {
                data[c * size * size + offset] = (pixel[c] as f32 - 127.5) / 128.0;
            }
        }

        ([1, 3, size, size], data)
    }

    fn anchor_centers(stride: usize) -> impl Iterator<Item = (f32, f32)> {
        let cells = INPUT_SIZE as usize / stride;
        (0..cells).flat_map(move |row| {
            (0..cells).flat_map(move |col| {
                let center = (col as f32 * stride as f32, row as f32 * stride as f32);
                std::iter::repeat(center).take(ANCHORS_PER_CELL)
            })
        })
    }

    fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
                kept.push(candidate);
            }
        }
        kept
    }

    /// Map a detector-space box back into image pixels, clipped to the image
    fn to_region(candidate: &Candidate, width: u32, height: u32) -> Option<FaceRegion> {
        let scale_x = width as f32 / INPUT_SIZE as f32;
        let scale_y = height as f32 / INPUT_SIZE as f32;

        let x1 = (candidate.x1 * scale_x).clamp(0.0, width as f32).round() as u32;
        let y1 = (candidate.y1 * scale_y).clamp(0.0, height as f32).round() as u32;
        let x2 = (candidate.x2 * scale_x).clamp(0.0, width as f32).round() as u32;
        let y2 = (candidate.y2 * scale_y).clamp(0.0, height as f32).round() as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(FaceRegion::new(x1, y1, x2 - x1, y2 - y1))
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &Image) -> Result<Vec<Detection>, DetectionError> {
        if image.is_empty() {
            return Ok(Vec::new());
        }

        // Prepare input tensor
        let input_value = Value::from_array(Self::preprocess(image))
            .map_err(|e| DetectionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Inference("detector session lock poisoned".to_string()))?;

        // Run inference
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        if outputs.len() < 2 * FEATURE_STRIDES.len() {
            return Err(DetectionError::Inference(format!(
                "expected at least {} outputs, got {}",
                2 * FEATURE_STRIDES.len(),
                outputs.len()
            )));
        }

        // Decode boxes per stride; outputs 0-2 are scores, 3-5 are distances
        let mut candidates = Vec::new();
        for (level, &stride) in FEATURE_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("scores at stride {}: {}", stride, e)))?;
            let (_, distances) = outputs[level + FEATURE_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("boxes at stride {}: {}", stride, e)))?;

            for (idx, (cx, cy)) in Self::anchor_centers(stride).enumerate() {
                let Some(&score) = scores.get(idx) else { break };
                if score < self.confidence_threshold {
                    continue;
                }
                let Some(d) = distances.get(idx * 4..idx * 4 + 4) else { break };
                // Distances are in stride units
                let s = stride as f32;
                candidates.push(Candidate {
                    x1: cx - d[0] * s,
                    y1: cy - d[1] * s,
                    x2: cx + d[2] * s,
                    y2: cy + d[3] * s,
                    score,
                });
            }
        }

        log::debug!("Found {} face candidates before NMS", candidates.len());

        // Suppress overlaps and map back to image pixels
        let (width, height) = image.dimensions();
        let detections: Vec<Detection> = Self::non_max_suppression(candidates, self.nms_threshold)
            .iter()
            .filter_map(|c| {
                Self::to_region(c, width, height).map(|region| Detection {
                    region,
                    confidence: c.score,
                })
            })
            .collect();

        log::debug!("Detected {} faces", detections.len());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x: u32, w: u32, confidence: f32) -> Detection {
        Detection {
            region: FaceRegion::new(x, 0, w, w),
            confidence,
        }
    }

    #[test]
    fn test_region_selection() {
        let detections = vec![
            detection(0, 10, 0.6),
            detection(20, 40, 0.7),
            detection(80, 20, 0.95),
        ];

        assert_eq!(RegionSelection::First.select(&detections), Some(&detections[0]));
        assert_eq!(RegionSelection::Largest.select(&detections), Some(&detections[1]));
        assert_eq!(
            RegionSelection::MostConfident.select(&detections),
            Some(&detections[2])
        );
        assert_eq!(RegionSelection::Largest.select(&[]), None);
    }

    #[test]
    fn test_region_selection_parse() {
        assert_eq!("largest".parse::<RegionSelection>(), Ok(RegionSelection::Largest));
        assert_eq!("Most-Confident".parse::<RegionSelection>(), Ok(RegionSelection::MostConfident));
        assert_eq!("first".parse::<RegionSelection>(), Ok(RegionSelection::First));
        assert!("biggest".parse::<RegionSelection>().is_err());
    }

    #[test]
    fn test_candidate_iou() {
        let a = Candidate { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, score: 0.9 };
        let b = Candidate { x1: 5.0, y1: 5.0, x2: 15.0, y2: 15.0, score: 0.8 };
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 0.1428).abs() < 0.01);
    }

    #[test]
    fn test_nms_drops_overlapping_boxes() {
        let candidates = vec![
            Candidate { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0, score: 0.8 },
            Candidate { x1: 1.0, y1: 1.0, x2: 11.0, y2: 11.0, score: 0.9 },
            Candidate { x1: 50.0, y1: 50.0, x2: 60.0, y2: 60.0, score: 0.7 },
        ];
        let kept = OnnxFaceDetector::non_max_suppression(candidates, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn test_to_region_scales_and_clips() {
        // 1280x640 image: x scale 2, y scale 1
        let c = Candidate { x1: -10.0, y1: 100.0, x2: 100.0, y2: 700.0, score: 0.9 };
        let region = OnnxFaceDetector::to_region(&c, 1280, 640).unwrap();
        assert_eq!(region, FaceRegion::new(0, 100, 200, 540));
        assert!(region.fits_within(1280, 640));

        let degenerate = Candidate { x1: 700.0, y1: 0.0, x2: 800.0, y2: 10.0, score: 0.9 };
        assert!(OnnxFaceDetector::to_region(&degenerate, 640, 640).is_none());
    }

    #[test]
    fn test_anchor_layout() {
        let anchors: Vec<_> = OnnxFaceDetector::anchor_centers(32).collect();
        assert_eq!(anchors.len(), 20 * 20 * ANCHORS_PER_CELL);
        assert_eq!(anchors[0], (0.0, 0.0));
        assert_eq!(anchors[1], (0.0, 0.0));
        assert_eq!(anchors[2], (32.0, 0.0));
    }

    #[test]
    fn test_missing_model() {
        let result = OnnxFaceDetector::new(
            "/nonexistent/detector.onnx",
            &OnnxRuntime::default(),
            0.5,
            0.4,
        );
        assert!(matches!(
            result,
            Err(DetectionError::Runtime(crate::runtime::RuntimeError::ModelNotFound(_)))
        ));
    }

    #[test]
    #[ignore] // Requires model file
    fn test_face_detection() {
        let detector =
            OnnxFaceDetector::new("models/scrfd_500m.onnx", &OnnxRuntime::default(), 0.5, 0.4)
                .unwrap();
        let image = Image::from_rgb(image::RgbImage::new(640, 480));
        assert!(detector.detect(&image).unwrap().is_empty());
    }
}
