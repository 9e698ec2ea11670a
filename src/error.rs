use std::time::Duration;

use thiserror::Error;

/// Failures of a [`RecordStore`](crate::traits::RecordStore) call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("store '{0}' is unavailable")]
    Unavailable(String),

    #[error("record '{vin}' kept changing under us; gave up after {attempts} attempts")]
    Contention { vin: String, attempts: u32 },

    #[error("record '{vin}' can't be decoded: {reason}")]
    Corrupt { vin: String, reason: String },

    #[error("no database backend for '{0}' in this build")]
    UnsupportedBackend(String),

    #[error("driver setup failed: {0}")]
    Driver(String),
}

/// Errors of the request path and of the sync cycle.
///
/// The first four variants are what a webhook caller can see; [`Error::code`] gives their stable wire names.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing shared secret. The supplied value is never part of the message.
    #[error("unauthorized webhook request")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("VIN not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),

    #[error("sync cycle failed: {0}")]
    CycleFailure(#[source] StoreError),

    #[error("sync cycle abandoned after {0:?}")]
    CycleTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn cycle(err: StoreError) -> Self {
        Error::CycleFailure(err)
    }

    pub fn invalid<S: ToString>(msg: S) -> Self {
        Error::InvalidRequest(msg.to_string())
    }

    /// Stable code reported to webhook callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized => "UNAUTHORIZED",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) | Error::CycleFailure(_) | Error::CycleTimeout(_) | Error::Config(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Unauthorized | Error::InvalidRequest(_) | Error::NotFound(_)
        )
    }
}
