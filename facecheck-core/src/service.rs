use crate::context::{ModelStatus, PipelineContext};
use crate::detect::RegionSelection;
use crate::embedding::Embedding;
use crate::extract::{extract, extract_detected, ExtractError};
use crate::frame::{FaceRegion, Image};
use crate::gallery::ReferenceGallery;
use crate::matcher::{self, MatchError, MatchResult};
use crate::store::{self, StorageError};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Result of a verification; always produced, even when extraction fails
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub is_match: bool,
    pub similarity: f32,
    pub message: String,
}

impl VerificationOutcome {
    fn decided(result: MatchResult) -> Self {
        let message = if result.is_match {
            format!("Faces match. Similarity: {:.3}", result.similarity)
        } else {
            format!("Faces don't match. Similarity: {:.3}", result.similarity)
        };
        Self {
            is_match: result.is_match,
            similarity: result.similarity,
            message,
        }
    }

    fn failed(error: impl Display) -> Self {
        Self {
            is_match: false,
            similarity: 0.0,
            message: format!("Verification failed: {}", error),
        }
    }
}

/// Two images sent as base64 data URLs, as a browser front end posts them
#[derive(Debug, Clone, Deserialize)]
pub struct CompareRequest {
    pub reference_image: String,
    pub test_image: String,
    #[serde(default)]
    pub threshold: Option<f32>,
}

/// What a single extraction produced, for display
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub dimension: usize,
    pub elapsed_ms: f64,
    /// First values of the embedding, rounded to 4 decimals
    pub leading_values: Vec<f32>,
}

impl ExtractionSummary {
    pub fn new(embedding: &Embedding, elapsed_ms: f64) -> Self {
        Self {
            dimension: embedding.len(),
            elapsed_ms: (elapsed_ms * 100.0).round() / 100.0,
            leading_values: embedding
                .iter()
                .take(5)
                .map(|v| (v * 10_000.0).round() / 10_000.0)
                .collect(),
        }
    }
}

/// Composes extraction, matching and storage behind one handle.
///
/// Cheap to clone; clones share the same read-only context.
#[derive(Clone)]
pub struct VerificationService {
    context: Arc<PipelineContext>,
    gallery: Option<ReferenceGallery>,
}

impl VerificationService {
    pub fn new(context: PipelineContext) -> Self {
        Self {
            context: Arc::new(context),
            gallery: None,
        }
    }

    pub fn with_gallery(mut self, gallery: ReferenceGallery) -> Self {
        self.gallery = Some(gallery);
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn status(&self) -> ModelStatus {
        self.context.status()
    }

    pub fn extract(
        &self,
        image: &Image,
        region: Option<&FaceRegion>,
    ) -> Result<Embedding, ExtractError> {
        extract(&self.context, image, region)
    }

    pub fn extract_detected(
        &self,
        image: &Image,
        selection: RegionSelection,
    ) -> Result<Embedding, ExtractError> {
        extract_detected(&self.context, image, selection)
    }

    /// Extract and time an embedding, returning it with a printable summary
    pub fn summarize(
        &self,
        image: &Image,
        region: Option<&FaceRegion>,
    ) -> Result<(Embedding, ExtractionSummary), ExtractError> {
        let start = Instant::now();
        let embedding = self.extract(image, region)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let summary = ExtractionSummary::new(&embedding, elapsed_ms);
        Ok((embedding, summary))
    }

    pub fn compare(
        &self,
        a: &Embedding,
        b: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        matcher::compare(a, b, threshold)
    }

    /// Decide whether two images show the same person. Never fails: errors
    /// are reported as a non-matching outcome with an explanatory message.
    pub fn verify(&self, reference: &Image, candidate: &Image, threshold: f32) -> VerificationOutcome {
        let start = Instant::now();
        let outcome = match self.try_verify(reference, candidate, threshold) {
            Ok(result) => VerificationOutcome::decided(result),
            Err(e) => {
                log::warn!("Verification failed: {}", e);
                VerificationOutcome::failed(e)
            }
        };
        log::debug!("Verification took {}ms", start.elapsed().as_millis());
        outcome
    }

    fn try_verify(
        &self,
        reference: &Image,
        candidate: &Image,
        threshold: f32,
    ) -> Result<MatchResult, Error> {
        let reference = self.extract(reference, None)?;
        let candidate = self.extract(candidate, None)?;
        Ok(matcher::compare(&reference, &candidate, threshold)?)
    }

    /// Like [`verify`](Self::verify), for encoded image bytes
    pub fn verify_encoded(
        &self,
        reference: &[u8],
        candidate: &[u8],
        threshold: f32,
    ) -> VerificationOutcome {
        let images = Image::decode(reference).and_then(|r| Ok((r, Image::decode(candidate)?)));
        match images {
            Ok((reference, candidate)) => self.verify(&reference, &candidate, threshold),
            Err(e) => {
                log::warn!("Could not decode verification input: {}", e);
                VerificationOutcome::failed(e)
            }
        }
    }

    /// Like [`verify`](Self::verify), for `data:image/...;base64,` URLs
    pub fn verify_data_urls(
        &self,
        reference: &str,
        candidate: &str,
        threshold: f32,
    ) -> VerificationOutcome {
        let images =
            Image::from_data_url(reference).and_then(|r| Ok((r, Image::from_data_url(candidate)?)));
        match images {
            Ok((reference, candidate)) => self.verify(&reference, &candidate, threshold),
            Err(e) => {
                log::warn!("Could not decode verification input: {}", e);
                VerificationOutcome::failed(e)
            }
        }
    }

    /// Answer a [`CompareRequest`]; `default_threshold` applies when the
    /// request carries none
    pub fn verify_request(&self, request: &CompareRequest, default_threshold: f32) -> VerificationOutcome {
        let threshold = request.threshold.unwrap_or(default_threshold);
        self.verify_data_urls(&request.reference_image, &request.test_image, threshold)
    }

    /// Verify a candidate image against every reference enrolled for `subject`
    pub fn verify_subject(&self, subject: &str, candidate: &Image, threshold: f32) -> VerificationOutcome {
        match self.try_verify_subject(subject, candidate, threshold) {
            Ok(result) => VerificationOutcome::decided(result),
            Err(e) => {
                log::warn!("Verification against {} failed: {}", subject, e);
                VerificationOutcome::failed(e)
            }
        }
    }

    fn try_verify_subject(
        &self,
        subject: &str,
        candidate: &Image,
        threshold: f32,
    ) -> Result<MatchResult, Error> {
        // Load enrolled references
        let references = self.gallery()?.load_embeddings(subject)?;
        if references.is_empty() {
            return Err(Error::NoReferences(subject.to_string()));
        }

        let probe = self.extract(candidate, None)?;

        // Best score over comparable references, below the threshold too;
        // references of another dimension are skipped
        let Some(best) = matcher::find_best_match(&probe, &references, f32::NEG_INFINITY) else {
            return Err(Error::NoReferences(subject.to_string()));
        };

        log::info!(
            "Subject {}: best reference #{} of {} with similarity {:.3}",
            subject,
            best.index,
            references.len(),
            best.similarity
        );

        Ok(MatchResult {
            is_match: best.similarity >= threshold,
            similarity: best.similarity,
        })
    }

    /// Extract an embedding and store it as a reference for `subject`
    pub fn enroll(
        &self,
        subject: &str,
        image: &Image,
        region: Option<&FaceRegion>,
        label: Option<String>,
    ) -> Result<String, Error> {
        let gallery = self.gallery()?;
        if gallery.has_references(subject) {
            log::info!("Adding another reference for subject {}", subject);
        }

        // Generate embedding
        let embedding = self.extract(image, region)?;

        // Save embedding
        Ok(gallery.enroll(subject, &embedding, label)?)
    }

    pub fn gallery(&self) -> Result<&ReferenceGallery, Error> {
        self.gallery.as_ref().ok_or(Error::NoGallery)
    }

    pub fn save_embedding<P: AsRef<Path>>(
        &self,
        embedding: &Embedding,
        path: P,
    ) -> Result<(), StorageError> {
        store::save_embedding(embedding, path)
    }

    pub fn load_embedding<P: AsRef<Path>>(&self, path: P) -> Result<Embedding, StorageError> {
        store::load_embedding(path)
    }
}
