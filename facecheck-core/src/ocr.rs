use crate::config::OcrConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Failed to run OCR program: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("Unreadable OCR output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    /// Four corner points of the text quadrilateral
    #[serde(rename = "box")]
    pub corners: Vec<[f32; 2]>,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    #[serde(default)]
    pub results: Vec<TextBox>,
    /// Seconds spent inside the engine
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub total_texts: usize,
    #[serde(default)]
    pub extracted_text: String,
}

impl OcrOutput {
    /// Mean confidence over all recognized boxes, 0 when nothing was found
    pub fn mean_confidence(&self) -> f32 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.results.iter().map(|r| r.confidence).sum::<f32>() / self.results.len() as f32
    }
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_path: &Path) -> Result<OcrOutput, OcrError>;
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    output: OcrOutput,
}

/// Parse the JSON document an OCR program prints
pub fn parse_output(stdout: &str) -> Result<OcrOutput, OcrError> {
    let response: RawResponse = serde_json::from_str(stdout.trim())?;
    if let Some(error) = response.error {
        return Err(OcrError::Engine(error));
    }
    Ok(response.output)
}

/// Runs a configured command per request. The program receives the image
/// path as its last argument and prints a single JSON document on stdout.
#[derive(Debug, Clone)]
pub struct CommandOcr {
    program: String,
    args: Vec<String>,
}

impl CommandOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl OcrEngine for CommandOcr {
    fn recognize(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        log::debug!("Running OCR: {} {:?} {}", self.program, self.args, image_path.display());

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // The engine reports failures as JSON too; prefer its message
            return match parse_output(&stdout) {
                Err(OcrError::Engine(message)) => Err(OcrError::Engine(message)),
                _ => Err(OcrError::Engine(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ))),
            };
        }

        let result = parse_output(&stdout)?;
        log::info!(
            "OCR found {} text boxes in {:.2}s",
            result.results.len(),
            result.processing_time
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let output = parse_output(
            r#"{"success": true,
                "results": [
                    {"box": [[0, 0], [10, 0], [10, 5], [0, 5]], "text": "JOHN", "confidence": 0.9},
                    {"box": [[0, 6], [10, 6], [10, 9], [0, 9]], "text": "DOE", "confidence": 0.7}
                ],
                "processing_time": 0.42, "total_texts": 2, "extracted_text": "JOHN DOE"}"#,
        )
        .unwrap();

        assert_eq!(output.total_texts, 2);
        assert_eq!(output.extracted_text, "JOHN DOE");
        assert_eq!(output.results[1].corners[2], [10.0, 9.0]);
        assert!((output.mean_confidence() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_engine_error() {
        let result = parse_output(r#"{"error": "Failed to load image", "success": false}"#);
        assert!(matches!(result, Err(OcrError::Engine(msg)) if msg == "Failed to load image"));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_output("Traceback ..."), Err(OcrError::Output(_))));
    }

    #[test]
    fn test_empty_result() {
        let output = parse_output(r#"{"success": true, "results": []}"#).unwrap();
        assert_eq!(output.mean_confidence(), 0.0);
        assert!(output.extracted_text.is_empty());
    }

    #[test]
    fn test_missing_program() {
        let engine = CommandOcr::new(&OcrConfig {
            program: "/nonexistent/ocr-program".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(
            engine.recognize(Path::new("id.jpg")),
            Err(OcrError::Spawn(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_output_is_parsed() {
        let engine = CommandOcr::new(&OcrConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"echo '{"results": [], "total_texts": 0, "extracted_text": ""}'"#.to_string(),
            ],
        });
        let output = engine.recognize(Path::new("id.jpg")).unwrap();
        assert_eq!(output.total_texts, 0);
    }
}
