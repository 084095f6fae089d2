//! Error types for the inventory core.

use crate::model::{ImageId, ImageName, ImageState, ImageType, RoleName};
use crate::version::Version;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InventoryError>;

/// Coarse error categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    UnprocessableState,
    Validation,
    Internal,
}

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(
        "Cannot remove {state} image {role}/{image_type}/{image_name}-{version} ({image_id}): \
         referenced by {references} element(s)"
    )]
    ImageInUse {
        image_id: ImageId,
        role: RoleName,
        image_type: ImageType,
        image_name: ImageName,
        version: Version,
        state: ImageState,
        references: usize,
    },

    #[error("Unprocessable state: {0}")]
    UnprocessableState(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: ImageState, to: ImageState },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::NotFound(_) => ErrorKind::NotFound,
            InventoryError::Conflict(_) => ErrorKind::Conflict,
            InventoryError::ImageInUse { .. } => ErrorKind::Conflict,
            InventoryError::UnprocessableState(_) => ErrorKind::UnprocessableState,
            InventoryError::InvalidStateTransition { .. } => ErrorKind::UnprocessableState,
            InventoryError::Validation(_) => ErrorKind::Validation,
            InventoryError::Store(_)
            | InventoryError::Json(_)
            | InventoryError::Io(_)
            | InventoryError::Config(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-style status code for the error kind.
    pub fn code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::UnprocessableState => 422,
            ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }

    /// Maps unique-constraint violations to `Conflict`, passes everything else through.
    pub(crate) fn from_store(err: rusqlite::Error, what: impl FnOnce() -> String) -> Self {
        if is_unique_violation(&err) {
            InventoryError::Conflict(what())
        } else {
            InventoryError::Store(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_is_unprocessable() {
        let err = InventoryError::InvalidStateTransition {
            from: ImageState::Candidate,
            to: ImageState::Superseded,
        };
        assert_eq!(err.kind(), ErrorKind::UnprocessableState);
        assert_eq!(err.code(), 422);
        assert_eq!(
            err.to_string(),
            "Invalid state transition from CANDIDATE to SUPERSEDED"
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(InventoryError::NotFound("x".into()).code(), 404);
        assert_eq!(InventoryError::Conflict("x".into()).code(), 409);
        assert_eq!(InventoryError::Validation("x".into()).code(), 400);
    }
}
