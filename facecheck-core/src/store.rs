use crate::embedding::Embedding;
use bincode::Options;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Embedding file not found: {0}")]
    NotFound(PathBuf),
    #[error("Corrupt embedding data: {0}")]
    CorruptData(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),
    #[error("Face not found: {0}")]
    FaceNotFound(String),
    #[error("Invalid subject name: {0:?}")]
    InvalidSubject(String),
}

const MAGIC: [u8; 4] = *b"FCEM";

/// Current embedding file format version
pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Dtype {
    F32,
}

/// On-disk embedding record: magic, format version, dtype, dimension,
/// SHA-256 of the payload, then the raw `f32` values. Values round-trip bit
/// for bit.
#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingFile {
    magic: [u8; 4],
    version: u16,
    dtype: Dtype,
    dimension: u32,
    checksum: [u8; 32],
    values: Vec<f32>,
}

fn payload_checksum(values: &[f32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.to_le_bytes());
    }
    let mut checksum = [0u8; 32];
    checksum.copy_from_slice(&hasher.finalize());
    checksum
}

/// Encode an embedding into the on-disk representation
pub fn encode(embedding: &Embedding) -> Result<Vec<u8>, StorageError> {
    let values = embedding.to_vec();
    let dimension = u32::try_from(values.len())
        .map_err(|_| StorageError::Serialization("embedding too long".to_string()))?;

    let file = EmbeddingFile {
        magic: MAGIC,
        version: FORMAT_VERSION,
        dtype: Dtype::F32,
        dimension,
        checksum: payload_checksum(&values),
        values,
    };
    bincode::serialize(&file).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Decode and validate the on-disk representation
pub fn decode(bytes: &[u8]) -> Result<Embedding, StorageError> {
    // Same fixed-int layout bincode::serialize writes, but nothing may follow the payload
    let file: EmbeddingFile = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| StorageError::CorruptData(format!("unreadable header or payload: {}", e)))?;

    if file.magic != MAGIC {
        return Err(StorageError::CorruptData("not an embedding file".to_string()));
    }
    if file.version != FORMAT_VERSION {
        return Err(StorageError::CorruptData(format!(
            "unsupported format version {}",
            file.version
        )));
    }
    if file.dimension as usize != file.values.len() {
        return Err(StorageError::CorruptData(format!(
            "header declares {} values, payload holds {}",
            file.dimension,
            file.values.len()
        )));
    }
    if payload_checksum(&file.values) != file.checksum {
        return Err(StorageError::CorruptData("checksum mismatch".to_string()));
    }

    Ok(Embedding::from_values(file.values))
}

/// Write an embedding to `path` (owner read/write only on unix)
pub fn save_embedding<P: AsRef<Path>>(embedding: &Embedding, path: P) -> Result<(), StorageError> {
    let path = path.as_ref();
    let data = encode(embedding)?;
    fs::write(path, data)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    log::debug!("Saved {}-dim embedding to {}", embedding.len(), path.display());
    Ok(())
}

/// Read an embedding written by [`save_embedding`]
pub fn load_embedding<P: AsRef<Path>>(path: P) -> Result<Embedding, StorageError> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
        _ => StorageError::Io(e),
    })?;

    let embedding = decode(&data)?;
    log::debug!("Loaded {}-dim embedding from {}", embedding.len(), path.display());
    Ok(embedding)
}
