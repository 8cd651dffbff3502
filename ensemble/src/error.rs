//! Orchestrator-level error taxonomy and its HTTP status mapping.

use axum::http::StatusCode;
use uuid::Uuid;

use crate::parser::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    BadRequest(String),

    #[error("no prediction nodes are enabled")]
    NoModelsEnabled,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown automated-predict session {0}")]
    SessionNotFound(Uuid),

    #[error("a training session is already in progress")]
    SessionActive,

    #[error("no training session is active")]
    SessionNotActive,

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self::Internal(error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::NoModelsEnabled
            | Self::Parse(_)
            | Self::SessionNotFound(_)
            | Self::SessionNotActive => StatusCode::BAD_REQUEST,
            Self::SessionActive => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            OrchestratorError::bad_request("nope").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OrchestratorError::NoModelsEnabled.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OrchestratorError::SessionActive.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            OrchestratorError::SessionNotActive.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OrchestratorError::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn parse_error_maps_to_bad_request() {
        let err = OrchestratorError::from(ParseError {
            file: "a.txt".to_string(),
            line: 3,
            reason: "expected `<time> <value>`".to_string(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("a.txt:3"));
    }
}
