use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Canonical embedding dimensionality
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

/// Face embedding vector.
///
/// Embeddings produced by extraction are L2-normalized. Values read back from
/// storage are kept bit-for-bit as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Array1<f32>);

impl Embedding {
    /// Wrap values as they are, without normalizing
    pub fn from_values(values: Vec<f32>) -> Self {
        Self(Array1::from_vec(values))
    }

    /// L2-normalize a raw model output. Returns `None` when the vector has
    /// zero (or non-finite) norm and cannot be scaled to unit length.
    pub fn normalized(raw: Vec<f32>) -> Option<Self> {
        l2_normalize(Array1::from_vec(raw)).map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &Array1<f32> {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.0.iter()
    }

    /// Euclidean norm
    pub fn norm(&self) -> f32 {
        sum_of_products(self.0.iter(), self.0.iter()).sqrt() as f32
    }

    /// Dot product over the common prefix; callers compare lengths first
    pub(crate) fn dot(&self, other: &Embedding) -> f32 {
        sum_of_products(self.0.iter(), other.0.iter()) as f32
    }
}

// f64 accumulation keeps a 512-term unit vector's self-dot within 1e-7 of 1.
fn sum_of_products<'a>(
    a: impl Iterator<Item = &'a f32>,
    b: impl Iterator<Item = &'a f32>,
) -> f64 {
    a.zip(b).map(|(x, y)| *x as f64 * *y as f64).sum()
}

/// L2 normalize an embedding vector
pub fn l2_normalize(mut raw: Array1<f32>) -> Option<Array1<f32>> {
    let norm = sum_of_products(raw.iter(), raw.iter()).sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    raw.mapv_inplace(|v| (v as f64 / norm) as f32);
    Some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_embedding() {
        let embedding = Embedding::normalized(vec![3.0, 4.0]).unwrap();

        assert!((embedding.norm() - 1.0).abs() < 1e-6);
        assert!((embedding.values()[0] - 0.6).abs() < 1e-6);
        assert!((embedding.values()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert!(Embedding::normalized(vec![0.0; 512]).is_none());
    }

    #[test]
    fn test_normalize_non_finite() {
        assert!(Embedding::normalized(vec![f32::NAN, 1.0]).is_none());
        assert!(Embedding::normalized(vec![f32::INFINITY, 1.0]).is_none());
    }

    #[test]
    fn test_self_dot_of_unit_vector() {
        let embedding = Embedding::normalized(vec![1.0; DEFAULT_EMBEDDING_DIM]).unwrap();
        assert!(embedding.dot(&embedding) >= 0.999_999);
    }

    #[test]
    fn test_from_values_keeps_values() {
        let embedding = Embedding::from_values(vec![2.0, 0.0]);
        assert_eq!(embedding.to_vec(), vec![2.0, 0.0]);
        assert_eq!(embedding.norm(), 2.0);
    }
}
