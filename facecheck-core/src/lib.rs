pub mod config;
pub mod context;
pub mod detect;
pub mod embedding;
pub mod extract;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod model;
pub mod ocr;
pub mod preprocess;
pub mod runtime;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::{Config, ModelConfig};
pub use context::{ModelStatus, PipelineContext};
pub use detect::{Detection, FaceDetector, RegionSelection};
pub use embedding::Embedding;
pub use extract::{extract, extract_detected};
pub use frame::{ChannelOrder, FaceRegion, Image};
pub use gallery::ReferenceGallery;
pub use matcher::{compare, MatchResult, DEFAULT_THRESHOLD};
pub use service::{CompareRequest, VerificationOutcome, VerificationService};
pub use store::{load_embedding, save_embedding};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Image error: {0}")]
    Image(#[from] frame::ImageError),
    #[error("Preprocessing error: {0}")]
    Preprocess(#[from] preprocess::PreprocessError),
    #[error("Model error: {0}")]
    Model(#[from] model::ModelError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),
    #[error("Comparison error: {0}")]
    Match(#[from] matcher::MatchError),
    #[error("Storage error: {0}")]
    Storage(#[from] store::StorageError),
    #[error("OCR error: {0}")]
    Ocr(#[from] ocr::OcrError),
    #[error("No reference embeddings for subject: {0}")]
    NoReferences(String),
    #[error("No reference gallery configured")]
    NoGallery,
}
