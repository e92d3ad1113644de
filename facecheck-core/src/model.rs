use crate::runtime::{OnnxRuntime, RuntimeError};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl From<RuntimeError> for ModelError {
    fn from(e: RuntimeError) -> Self {
        ModelError::Unavailable(e.to_string())
    }
}

/// Opaque scoring function mapping a `(1, C, H, W)` tensor to a raw vector.
///
/// Implementations are shared between concurrent extraction calls; tests
/// substitute deterministic stubs.
pub trait EmbeddingModel: Send + Sync {
    fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>, ModelError>;

    /// Short human-readable identification, used in status output
    fn describe(&self) -> String {
        "embedding model".to_string()
    }
}

/// Embedding model backed by an ONNX Runtime session with one input and one output.
pub struct OnnxEmbeddingModel {
    // Session::run needs &mut; concurrent callers take turns
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    path: PathBuf,
}

impl OnnxEmbeddingModel {
    /// Load the model. Any failure here is fatal for the service.
    pub fn load<P: AsRef<Path>>(model_path: P, runtime: &OnnxRuntime) -> Result<Self, ModelError> {
        let path = model_path.as_ref().to_path_buf();
        let session = runtime.create_session(&path)?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| ModelError::Unavailable("model declares no inputs".to_string()))?;
        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| ModelError::Unavailable("model declares no outputs".to_string()))?;

        log::info!("Embedding model input: {}, output: {}", input_name, output_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>, ModelError> {
        // Prepare input tensor
        let shape = {
            let dims = input.shape();
            [dims[0], dims[1], dims[2], dims[3]]
        };
        let data: Vec<f32> = input.iter().copied().collect();

        let input_value = Value::from_array((shape, data))
            .map_err(|e| ModelError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Inference("model session lock poisoned".to_string()))?;

        // Run inference
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (_shape, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("Failed to extract embedding: {}", e)))?;

        // Batch of one: the flat buffer is the embedding
        Ok(values.to_vec())
    }

    fn describe(&self) -> String {
        format!("ONNX model {}", self.path.display())
    }
}
