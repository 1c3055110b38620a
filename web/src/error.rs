//! The JSON error-code protocol spec.md §6/§7 defines: `{"code":"...",
//! "message":"..."}`, with a fixed vocabulary of machine-readable codes the
//! client can match on. Unknown/unexpected server errors never get a code of
//! their own — they fall through to a bare `500` with no JSON body, the way
//! the wire contract only promises codes for the *known* kinds.

use serde::{Deserialize, Serialize};
use vaultree_datastore::{DatastoreError, ValidationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownBlobType,
    ValidationFailed,
    InvalidBlobName,
    UploadInProgress,
    NoFormField,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownBlobType => "UNKNOWN_BLOB_TYPE",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidBlobName => "INVALID_BLOB_NAME",
            ErrorCode::UploadInProgress => "UPLOAD_IN_PROGRESS",
            ErrorCode::NoFormField => "NO_FORM_FIELD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UNKNOWN_BLOB_TYPE" => Some(ErrorCode::UnknownBlobType),
            "VALIDATION_FAILED" => Some(ErrorCode::ValidationFailed),
            "INVALID_BLOB_NAME" => Some(ErrorCode::InvalidBlobName),
            "UPLOAD_IN_PROGRESS" => Some(ErrorCode::UploadInProgress),
            "NO_FORM_FIELD" => Some(ErrorCode::NoFormField),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }
}

/// Classifies a [`DatastoreError`] into the wire protocol's known codes,
/// or `None` for anything that should surface as a bare `500`.
pub fn classify(err: &DatastoreError) -> Option<ErrorCode> {
    match err {
        DatastoreError::UnknownBlobType(_) => Some(ErrorCode::UnknownBlobType),
        DatastoreError::UploadInProgress(_) => Some(ErrorCode::UploadInProgress),
        DatastoreError::Validation(ValidationFailure::InvalidStaticBlobHash) => {
            Some(ErrorCode::ValidationFailed)
        }
        DatastoreError::Validation(ValidationFailure::Other(_)) => Some(ErrorCode::ValidationFailed),
        DatastoreError::NotFound(_) | DatastoreError::Io(_) => None,
    }
}
