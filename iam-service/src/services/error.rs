use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Unknown principal, wrong password and inactive account all map here.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unauthenticated: {0}")]
    Unauthenticated(&'static str),

    #[error("Second factor required")]
    SecondFactorRequired,

    #[error("Invalid second factor code")]
    InvalidSecondFactor,

    #[error("Invalid backup code")]
    InvalidBackupCode,

    #[error("Access denied")]
    AccessDenied,

    #[error("Not found: {0}")]
    NotFound(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(StoreError::Conflict(constraint)) => {
                tracing::debug!(constraint = %constraint, "Unique constraint violated");
                AppError::Conflict(anyhow::anyhow!("resource already exists"))
            }
            ServiceError::Store(StoreError::Database(e)) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("invalid credentials"))
            }
            ServiceError::Unauthenticated(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            ServiceError::SecondFactorRequired => {
                AppError::Forbidden(anyhow::anyhow!("second factor required"))
            }
            ServiceError::InvalidSecondFactor => {
                AppError::Forbidden(anyhow::anyhow!("invalid second factor code"))
            }
            ServiceError::InvalidBackupCode => {
                AppError::Forbidden(anyhow::anyhow!("invalid backup code"))
            }
            ServiceError::AccessDenied => AppError::Forbidden(anyhow::anyhow!("access denied")),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
        }
    }
}
