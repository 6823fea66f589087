#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("proposal not found: {0}")]
    NotFound(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("proposal expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("cooling period ended at {effective_at}")]
    CoolingPeriodEnded { effective_at: DateTime<Utc> },

    #[error("cooldown active until {ends_at}")]
    CooldownActive { ends_at: DateTime<Utc> },

    #[error("already acknowledged by: {0}")]
    AlreadyAcknowledged(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("audit error: {0}")]
    Audit(String),
}

impl Error {
    /// Expected, recoverable domain conditions. Everything else is
    /// infrastructure and should be retried by the caller, not mapped
    /// to a user-facing message.
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            Error::Storage(_)
                | Error::Serialization(_)
                | Error::Config(_)
                | Error::Audit(_)
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
