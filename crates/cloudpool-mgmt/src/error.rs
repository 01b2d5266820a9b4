use axum::http::StatusCode;
use cloudpool_rclone::RcloneError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MgmtError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Pool already running: {0}")]
    AlreadyRunning(String),

    #[error("Pool not running: {0}")]
    NotRunning(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] duckdb::Error),

    #[error(transparent)]
    Rclone(#[from] RcloneError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MgmtError>;

impl MgmtError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        MgmtError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            MgmtError::Validation(_) => StatusCode::BAD_REQUEST,
            MgmtError::NotFound { .. } => StatusCode::NOT_FOUND,
            MgmtError::AlreadyRunning(_) | MgmtError::NotRunning(_) | MgmtError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            MgmtError::Rclone(e) if e.is_conflict() => StatusCode::CONFLICT,
            MgmtError::Rclone(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            MgmtError::Persistence(_) | MgmtError::Rclone(_) | MgmtError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_bad_request() {
        let err = MgmtError::Validation("name is required".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_message_and_status() {
        let err = MgmtError::not_found("pool", "p1");
        assert_eq!(err.to_string(), "pool not found: p1");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_state_conflicts_map_to_409() {
        assert_eq!(
            MgmtError::AlreadyRunning("p1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            MgmtError::NotRunning("p1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            MgmtError::Conflict("account a1 is in use".into()).status_code(),
            StatusCode::CONFLICT
        );
        let mounted = MgmtError::from(RcloneError::AlreadyMounted("/mnt/p1".into()));
        assert_eq!(mounted.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_tool_failures_are_internal_errors() {
        let err = MgmtError::from(RcloneError::Composition {
            union: "union_p1".into(),
            reason: "no accounts in pool".into(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to compose union union_p1: no accounts in pool");
    }

    #[test]
    fn test_unsupported_provider_is_bad_request() {
        let err = MgmtError::from(RcloneError::UnsupportedProvider("box".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
