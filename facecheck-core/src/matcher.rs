use crate::embedding::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default similarity cutoff for declaring a match
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// How far from 1.0 an input norm may drift before it is rejected
pub const NORM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("Embedding lengths differ: {left} vs {right}")]
    ShapeMismatch { left: usize, right: usize },
    #[error("Embedding is not unit length (norm {norm:.6})")]
    NotNormalized { norm: f32 },
}

/// Outcome of comparing two embeddings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_match: bool,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Best gallery entry for a probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GalleryMatch {
    pub index: usize,
    pub similarity: f32,
}

fn check_unit(embedding: &Embedding) -> Result<(), MatchError> {
    let norm = embedding.norm();
    if (norm - 1.0).abs() > NORM_TOLERANCE || !norm.is_finite() {
        return Err(MatchError::NotNormalized { norm });
    }
    Ok(())
}

/// Cosine similarity of two unit-length embeddings.
///
/// For unit vectors this is just the dot product, so inputs that are not
/// unit length are rejected instead of producing a skewed score.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::ShapeMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    check_unit(a)?;
    check_unit(b)?;

    Ok(a.dot(b).clamp(-1.0, 1.0))
}

/// Compare two embeddings; a match means `similarity >= threshold`
pub fn compare(a: &Embedding, b: &Embedding, threshold: f32) -> Result<MatchResult, MatchError> {
    let similarity = cosine_similarity(a, b)?;
    Ok(MatchResult {
        is_match: similarity >= threshold,
        similarity,
    })
}

/// Find the best match above threshold. Candidates that cannot be compared
/// with the query are skipped.
pub fn find_best_match(
    query: &Embedding,
    candidates: &[Embedding],
    threshold: f32,
) -> Option<GalleryMatch> {
    candidates
        .iter()
        .enumerate()
        .filter_map(|(idx, candidate)| match cosine_similarity(query, candidate) {
            Ok(similarity) => Some((idx, similarity)),
            Err(e) => {
                log::warn!("Skipping gallery entry {}: {}", idx, e);
                None
            }
        })
        .filter(|(_, sim)| *sim >= threshold)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(index, similarity)| GalleryMatch { index, similarity })
}
