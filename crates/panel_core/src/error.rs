use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

use crate::access::HierarchyViolation;

pub const GENERIC_FAILURE: &str = "Something went wrong.";

/// Expected outcomes of a panel operation, plus the single unexpected path.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyViolation),
    #[error("Pick a user and role first (for this panel).")]
    IncompleteSelection,
    /// Platform refused the mutation; the message is the platform's own.
    #[error("{0}")]
    Platform(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl PanelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::Hierarchy(_) => ErrorCode::HierarchyViolation,
            Self::IncompleteSelection => ErrorCode::IncompleteSelection,
            Self::Platform(_) => ErrorCode::Platform,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Text safe to show the operator. Internal faults never leak detail.
    pub fn operator_message(&self) -> String {
        match self {
            Self::Internal(_) => GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<PanelError> for ApiError {
    fn from(value: PanelError) -> Self {
        ApiError::new(value.code(), value.operator_message())
    }
}
