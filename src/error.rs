//! Typed errors at the workflow seams.
//!
//! Plumbing (file I/O, config, CLI) stays on `anyhow`; these types exist where a
//! caller needs to branch on what went wrong. They travel through `anyhow` and
//! are recovered with `downcast_ref`.
use crate::workflow::MacroStep;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Client-side rejection raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No files selected.")]
    EmptyBatch,
    #[error(
        "Invalid file type(s). Only PDF, Word documents, and Excel files are supported. (rejected: {})",
        .files.join(", ")
    )]
    InvalidFileType { files: Vec<String> },
    #[error(
        "File(s) too large. Maximum size is {limit_mb}MB per file. (rejected: {})",
        .files.join(", ")
    )]
    FileTooLarge { files: Vec<String>, limit_mb: u64 },
    #[error("{0} is required.")]
    MissingField(&'static str),
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Password must be at least {min} characters.")]
    PasswordTooShort { min: usize },
}

/// Rule that rejected a batch, for callers that only care about the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    EmptyBatch,
    InvalidFileType,
    FileTooLarge,
    MissingField,
    PasswordMismatch,
    PasswordTooShort,
}

impl ValidationError {
    pub fn kind(&self) -> ValidationKind {
        match self {
            Self::EmptyBatch => ValidationKind::EmptyBatch,
            Self::InvalidFileType { .. } => ValidationKind::InvalidFileType,
            Self::FileTooLarge { .. } => ValidationKind::FileTooLarge,
            Self::MissingField(_) => ValidationKind::MissingField,
            Self::PasswordMismatch => ValidationKind::PasswordMismatch,
            Self::PasswordTooShort { .. } => ValidationKind::PasswordTooShort,
        }
    }

    /// True when the error came from checking an upload batch.
    pub fn rejects_upload(&self) -> bool {
        matches!(
            self.kind(),
            ValidationKind::EmptyBatch
                | ValidationKind::InvalidFileType
                | ValidationKind::FileTooLarge
        )
    }
}

/// Failure of a remote call.
///
/// `status` is the HTTP status for an explicit server rejection and `0` when no
/// usable response arrived at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn network(cause: impl fmt::Display) -> Self {
        Self::new(0, format!("Network error: {cause}"))
    }

    pub fn is_network(&self) -> bool {
        self.status == 0
    }
}

/// Macro-step level failure surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{step} failed: {source}")]
    StepFailed {
        step: MacroStep,
        #[source]
        source: ApiError,
    },
    #[error("{step} is not ready: {reason}")]
    NotReady { step: MacroStep, reason: String },
    #[error("{step} already completed")]
    AlreadyCompleted { step: MacroStep },
    #[error("generated response references {actual}, expected {expected}")]
    MismatchedRfp { expected: String, actual: String },
    #[error(
        "run is in use by {holder}; remove {} if it is no longer running",
        .lock.display()
    )]
    RunInUse { holder: String, lock: PathBuf },
}
