use crate::config::ModelConfig;
use crate::context::PipelineContext;
use crate::detect::{Detection, DetectionError, FaceDetector};
use crate::frame::{FaceRegion, Image};
use crate::model::{EmbeddingModel, ModelError};
use image::{Rgb, RgbImage};
use ndarray::{Array4, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Stand-in embedding model. Projects the per-channel means of the input onto `dim` outputs.
/// Distinct colours give distinct directions; identical input gives identical output.
pub struct ChannelMeanModel {
    pub dim: usize,
    pub calls: AtomicUsize,
}

impl ChannelMeanModel {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingModel for ChannelMeanModel {
    fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let channels = input.shape()[1];
        let means: Vec<f32> = (0..channels)
            .map(|c| input.index_axis(Axis(1), c).mean().unwrap_or(0.0))
            .collect();
        Ok((0..self.dim)
            .map(|i| means[i % channels] * (1.0 + (i / channels) as f32 * 0.01))
            .collect())
    }
}

/// Always returns the same vector
pub struct FixedModel(pub Vec<f32>);

impl EmbeddingModel for FixedModel {
    fn run(&self, _input: &Array4<f32>) -> Result<Vec<f32>, ModelError> {
        Ok(self.0.clone())
    }
}

pub struct FailingModel;

impl EmbeddingModel for FailingModel {
    fn run(&self, _input: &Array4<f32>) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::Inference("stub failure".to_string()))
    }
}

/// Reports a fixed list of detections
pub struct FixedDetector(pub Vec<Detection>);

impl FaceDetector for FixedDetector {
    fn detect(&self, _image: &Image) -> Result<Vec<Detection>, DetectionError> {
        Ok(self.0.clone())
    }
}

pub fn context_with(model: impl EmbeddingModel + 'static) -> PipelineContext {
    PipelineContext::new(ModelConfig::default(), Arc::new(model)).unwrap()
}

pub fn channel_mean_context() -> PipelineContext {
    context_with(ChannelMeanModel::new(ModelConfig::default().num_classes))
}

/// 112x112 smooth gradient, as used by the demo
pub fn gradient_image() -> Image {
    let mut raster = RgbImage::new(112, 112);
    for (x, y, pixel) in raster.enumerate_pixels_mut() {
        *pixel = Rgb([
            (255 * y / 112) as u8,
            (255 * x / 112) as u8,
            128,
        ]);
    }
    Image::from_rgb(raster)
}

pub fn solid_image(color: [u8; 3]) -> Image {
    Image::from_rgb(RgbImage::from_pixel(112, 112, Rgb(color)))
}

pub fn detection(region: FaceRegion, confidence: f32) -> Detection {
    Detection { region, confidence }
}
