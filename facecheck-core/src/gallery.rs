use crate::embedding::Embedding;
use crate::store::{load_embedding, save_embedding, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    pub id: String,
    pub label: Option<String>,
    pub dimension: usize,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubjectMetadata {
    #[serde(default)]
    faces: Vec<ReferenceMetadata>,
}

/// Enrolled reference embeddings, one directory per subject:
///
/// ```text
/// <root>/<subject>/metadata.toml
/// <root>/<subject>/face_0.bin
/// ```
#[derive(Debug, Clone)]
pub struct ReferenceGallery {
    base_path: PathBuf,
}

impl ReferenceGallery {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn subject_dir(&self, subject: &str) -> Result<PathBuf, StorageError> {
        let valid = !subject.is_empty()
            && subject != "."
            && subject != ".."
            && !subject.contains(|c| matches!(c, '/' | '\\' | '\0'));
        if !valid {
            return Err(StorageError::InvalidSubject(subject.to_string()));
        }
        Ok(self.base_path.join(subject))
    }

    fn metadata_path(dir: &Path) -> PathBuf {
        dir.join("metadata.toml")
    }

    fn embedding_path(dir: &Path, face_id: &str) -> PathBuf {
        dir.join(format!("{}.bin", face_id))
    }

    fn load_metadata(dir: &Path) -> Result<SubjectMetadata, StorageError> {
        let path = Self::metadata_path(dir);
        if !path.exists() {
            return Ok(SubjectMetadata::default());
        }

        let contents = fs::read_to_string(&path)?;
        toml::from_str(&contents).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn save_metadata(dir: &Path, metadata: &SubjectMetadata) -> Result<(), StorageError> {
        let contents = toml::to_string_pretty(metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(Self::metadata_path(dir), contents)?;
        Ok(())
    }

    /// Store a reference embedding for a subject and return its face ID
    pub fn enroll(
        &self,
        subject: &str,
        embedding: &Embedding,
        label: Option<String>,
    ) -> Result<String, StorageError> {
        let dir = self.subject_dir(subject)?;

        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
            }
        }

        // Load existing metadata
        let mut metadata = Self::load_metadata(&dir)?;

        // IDs are never reused after a removal
        let next = metadata
            .faces
            .iter()
            .filter_map(|f| f.id.strip_prefix("face_")?.parse::<usize>().ok())
            .max()
            .map_or(0, |n| n + 1);
        let face_id = format!("face_{}", next);

        // Save embedding file
        save_embedding(embedding, Self::embedding_path(&dir, &face_id))?;

        // Update metadata
        metadata.faces.push(ReferenceMetadata {
            id: face_id.clone(),
            label,
            dimension: embedding.len(),
            enrolled_at: Utc::now(),
        });
        Self::save_metadata(&dir, &metadata)?;

        log::info!("Enrolled {} for subject {}", face_id, subject);
        Ok(face_id)
    }

    /// Load every reference embedding of a subject
    pub fn load_embeddings(&self, subject: &str) -> Result<Vec<Embedding>, StorageError> {
        let dir = self.subject_dir(subject)?;
        if !dir.exists() {
            return Err(StorageError::SubjectNotFound(subject.to_string()));
        }

        Self::load_metadata(&dir)?
            .faces
            .iter()
            .map(|face| load_embedding(Self::embedding_path(&dir, &face.id)))
            .collect()
    }

    /// Remove a reference embedding by ID
    pub fn remove(&self, subject: &str, face_id: &str) -> Result<(), StorageError> {
        let dir = self.subject_dir(subject)?;
        if !dir.exists() {
            return Err(StorageError::SubjectNotFound(subject.to_string()));
        }

        let mut metadata = Self::load_metadata(&dir)?;
        let index = metadata
            .faces
            .iter()
            .position(|f| f.id == face_id)
            .ok_or_else(|| StorageError::FaceNotFound(face_id.to_string()))?;
        metadata.faces.remove(index);

        // Delete embedding file
        let embedding_path = Self::embedding_path(&dir, face_id);
        if embedding_path.exists() {
            fs::remove_file(&embedding_path)?;
        }

        Self::save_metadata(&dir, &metadata)?;
        log::info!("Removed {} for subject {}", face_id, subject);
        Ok(())
    }

    /// List reference metadata for a subject; unknown subjects have none
    pub fn list(&self, subject: &str) -> Result<Vec<ReferenceMetadata>, StorageError> {
        let dir = self.subject_dir(subject)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        Ok(Self::load_metadata(&dir)?.faces)
    }

    pub fn has_references(&self, subject: &str) -> bool {
        self.list(subject)
            .map(|faces| !faces.is_empty())
            .unwrap_or(false)
    }
}
