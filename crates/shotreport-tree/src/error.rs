#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors raised at the ingestion boundary.
///
/// Every variant is produced before the tree is touched, so a rejected event
/// never leaves partial writes behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    #[error("suite \"{suite}\" cannot change shape: {detail}")]
    ShapeConflict { suite: String, detail: String },

    #[error("event decode failed: {message}")]
    Decode { message: String },
}

impl TreeError {
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn shape_conflict(suite: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ShapeConflict {
            suite: suite.into(),
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}
