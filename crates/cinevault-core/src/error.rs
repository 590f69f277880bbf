//! Error types module
//!
//! Unified error type for the upload engine's caller-facing surface.
//! Part-level transient errors are handled inside the worker retry loop and
//! never appear here; what surfaces is planning failures, session-level
//! faults, and finalization failures.

use uuid::Uuid;

use crate::planner::PlanError;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("file of {total_bytes} bytes exceeds configured maximum of {max_bytes} bytes")]
    FileTooLarge { total_bytes: u64, max_bytes: u64 },

    #[error("finalization failed: {reason}")]
    Finalize { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_converts() {
        let err: UploadError = PlanError::EmptyFile.into();
        assert!(matches!(err, UploadError::Plan(PlanError::EmptyFile)));
        assert_eq!(
            err.to_string(),
            "planning error: cannot plan an upload for an empty file"
        );
    }

    #[test]
    fn messages_are_operator_readable() {
        let err = UploadError::FileTooLarge {
            total_bytes: 11,
            max_bytes: 10,
        };
        assert!(err.to_string().contains("exceeds configured maximum"));

        let err = UploadError::Finalize {
            reason: "complete failed: upload_part timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "finalization failed: complete failed: upload_part timed out"
        );
    }
}
