use crate::frame::ChannelOrder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to parse model config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
    /// JSON document describing input size, normalization and output size
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Face detection is optional; without a model every image is used whole
    pub model_path: Option<PathBuf>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_nms_threshold() -> f32 {
    0.4
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence_threshold: default_confidence_threshold(),
            nms_threshold: default_nms_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: crate::matcher::DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Threads ONNX Runtime may use inside a single inference call
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_intra_threads() -> usize {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub gallery_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gallery_path: PathBuf::from("/var/lib/facecheck/gallery"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub program: String,
    /// Arguments placed before the image path
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["python_ocr/ocr_service.py".to_string()],
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. explicit path, if given (errors are reported, not skipped)
    /// 2. /etc/facecheck/facecheck.toml (system-wide)
    /// 3. ~/.config/facecheck/facecheck.toml (user)
    /// 4. Compiled defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_path(path)?;
            config.validate()?;
            log::info!("Loaded configuration from {}", path.display());
            return Ok(config);
        }

        if let Ok(config) = Self::load_from_path("/etc/facecheck/facecheck.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("facecheck")
                .join("facecheck.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        log::debug!("No configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.model_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Embedding model path cannot be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.nms_threshold) {
            return Err(ConfigError::Validation(
                "Detection NMS threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.matching.threshold) {
            return Err(ConfigError::Validation(
                "Matching threshold must be between -1.0 and 1.0".to_string(),
            ));
        }

        if self.runtime.intra_threads == 0 {
            return Err(ConfigError::Validation(
                "Runtime intra_threads must be greater than 0".to_string(),
            ));
        }

        if self.storage.gallery_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Gallery path cannot be empty".to_string(),
            ));
        }

        if self.ocr.program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "OCR program cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig {
                model_path: PathBuf::from("models/onnx_model/model.onnx"),
                config_path: PathBuf::from("models/onnx_model/config.json"),
            },
            detection: DetectionConfig::default(),
            matching: MatchingConfig::default(),
            runtime: RuntimeConfig::default(),
            storage: StorageConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

/// Where a [`ModelConfig`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The config file was missing or unreadable; documented defaults apply
    Defaults,
}

/// Preprocessing and output description of the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `[channels, height, width]`
    pub input_size: [usize; 3],
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    /// Embedding dimensionality
    pub num_classes: usize,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Channel order the model was trained on
    #[serde(default)]
    pub channel_order: ChannelOrder,
}

fn default_architecture() -> String {
    "unknown".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: [3, 112, 112],
            mean: vec![0.5, 0.5, 0.5],
            std: vec![0.5, 0.5, 0.5],
            num_classes: crate::embedding::DEFAULT_EMBEDDING_DIM,
            architecture: default_architecture(),
            channel_order: ChannelOrder::Rgb,
        }
    }
}

impl ModelConfig {
    /// Load the model config, substituting defaults when the file is missing
    /// or cannot be parsed. A file that parses but describes an impossible
    /// model is still an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<(Self, ConfigSource), ConfigError> {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => {
                log::info!("Model configuration loaded from {}", path.display());
                Ok((config, ConfigSource::File(path.to_path_buf())))
            }
            Err(ConfigError::Validation(msg)) => Err(ConfigError::Validation(msg)),
            Err(e) => {
                log::warn!(
                    "Could not load model config {} ({}); running with default model config",
                    path.display(),
                    e
                );
                Ok((Self::default(), ConfigSource::Defaults))
            }
        }
    }

    /// Strictly load and validate a model config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn channels(&self) -> usize {
        self.input_size[0]
    }

    pub fn height(&self) -> usize {
        self.input_size[1]
    }

    pub fn width(&self) -> usize {
        self.input_size[2]
    }

    /// Check that the config describes a model the pipeline can feed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels() != 3 {
            return Err(ConfigError::Validation(format!(
                "Model must take 3 input channels, got {}",
                self.channels()
            )));
        }

        if self.height() == 0 || self.width() == 0 {
            return Err(ConfigError::Validation(
                "Model input height and width must be non-zero".to_string(),
            ));
        }

        if self.mean.len() != self.channels() || self.std.len() != self.channels() {
            return Err(ConfigError::Validation(format!(
                "mean and std must have {} entries, got {} and {}",
                self.channels(),
                self.mean.len(),
                self.std.len()
            )));
        }

        if self.std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(ConfigError::Validation(
                "std entries must be finite and non-zero".to_string(),
            ));
        }

        if self.num_classes == 0 {
            return Err(ConfigError::Validation(
                "num_classes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
