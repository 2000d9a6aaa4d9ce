//! Client-side upload validation.
//!
//! Validation is a pure check over file metadata: names, declared MIME types and
//! sizes. No bytes are read until a batch has been accepted, and the only way to
//! obtain uploadable [`FilePart`]s is through a [`ValidatedBatch`].
use crate::error::ValidationError;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// 10 MiB per file.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

const RFP_MIME_TYPES: &[&str] = &[MIME_PDF, MIME_DOC, MIME_DOCX, MIME_XLS, MIME_XLSX];
const COMPANY_DOC_MIME_TYPES: &[&str] = &[MIME_PDF];

/// A file the user selected, described by metadata only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    pub name: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub source: PathBuf,
}

impl UploadCandidate {
    /// Describe a file on disk; the MIME type is inferred from its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata =
            fs::metadata(path).with_context(|| format!("stat upload {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            name,
            byte_size: metadata.len(),
            mime_type,
            source: path.to_path_buf(),
        })
    }

    pub fn from_paths(paths: &[PathBuf]) -> Result<Vec<Self>> {
        paths.iter().map(|path| Self::from_path(path)).collect()
    }
}

/// Allow-list and size ceiling applied to a whole batch.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    allowed_mime_types: &'static [&'static str],
    max_file_bytes: u64,
}

impl UploadPolicy {
    /// RFP documents: PDF, Word and Excel.
    pub fn rfp() -> Self {
        Self {
            allowed_mime_types: RFP_MIME_TYPES,
            max_file_bytes: MAX_UPLOAD_BYTES,
        }
    }

    /// Company reference documents are PDF only.
    pub fn company_docs() -> Self {
        Self {
            allowed_mime_types: COMPANY_DOC_MIME_TYPES,
            max_file_bytes: MAX_UPLOAD_BYTES,
        }
    }

    pub fn allows(&self, mime_type: &str) -> bool {
        self.allowed_mime_types.contains(&mime_type)
    }

    /// Accept the batch as a whole or reject it as a whole.
    ///
    /// The type rule is evaluated before the size rule, so a batch violating both
    /// reports `InvalidFileType`.
    pub fn validate(
        &self,
        candidates: Vec<UploadCandidate>,
    ) -> Result<ValidatedBatch, ValidationError> {
        if candidates.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }

        let invalid: Vec<String> = candidates
            .iter()
            .filter(|candidate| !self.allows(&candidate.mime_type))
            .map(|candidate| candidate.name.clone())
            .collect();
        if !invalid.is_empty() {
            tracing::debug!(rejected = invalid.len(), "batch rejected: file type");
            return Err(ValidationError::InvalidFileType { files: invalid });
        }

        let oversized: Vec<String> = candidates
            .iter()
            .filter(|candidate| candidate.byte_size > self.max_file_bytes)
            .map(|candidate| candidate.name.clone())
            .collect();
        if !oversized.is_empty() {
            tracing::debug!(rejected = oversized.len(), "batch rejected: file size");
            return Err(ValidationError::FileTooLarge {
                files: oversized,
                limit_mb: self.max_file_bytes / (1024 * 1024),
            });
        }

        Ok(ValidatedBatch { candidates })
    }
}

/// A batch that passed every rule of the policy it was checked against.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    candidates: Vec<UploadCandidate>,
}

impl ValidatedBatch {
    pub fn candidates(&self) -> &[UploadCandidate] {
        &self.candidates
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.candidates
            .iter()
            .map(|candidate| candidate.source.clone())
            .collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.candidates.iter().map(|c| c.byte_size).sum()
    }

    /// Read file contents for upload.
    pub fn read_parts(&self) -> Result<Vec<FilePart>> {
        self.candidates
            .iter()
            .map(|candidate| {
                let bytes = fs::read(&candidate.source)
                    .with_context(|| format!("read upload {}", candidate.source.display()))?;
                Ok(FilePart {
                    file_name: candidate.name.clone(),
                    mime_type: candidate.mime_type.clone(),
                    bytes,
                })
            })
            .collect()
    }
}

/// File contents ready for a multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    #[cfg(test)]
    pub(crate) fn for_test(file_name: &str, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            bytes: bytes.to_vec(),
        }
    }
}
