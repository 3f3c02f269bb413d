use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FaasError {
    #[error("function not found: {0}")]
    FunctionNotFound(Uuid),

    #[error("invocation not found: {0}")]
    InvocationNotFound(Uuid),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FaasError {
    pub fn validation(msg: impl Into<String>) -> Self {
        FaasError::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FaasError::FunctionNotFound(_)
                | FaasError::InvocationNotFound(_)
                | FaasError::ScheduleNotFound(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, FaasError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, FaasError>;
