//! Error types for the reconciliation core.
//!
//! Every failure the run-loop can observe is one of these variants. The
//! controller treats all retryable kinds the same way (requeue with
//! backoff); only [`Error::Invariant`], configuration errors and a cache
//! sync timeout are fatal.

use crate::resource::Identity;
use kube::error::ErrorResponse;
use thiserror::Error;

/// Result type for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operator errors
#[derive(Error, Debug)]
pub enum Error {
    /// The object does not exist. Expected: drives Create.
    #[error("{0} not found")]
    NotFound(String),

    /// Another writer created the object first. Expected under races.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Optimistic-concurrency collision on write.
    #[error("conflict writing {identity}: {message}")]
    Conflict { identity: String, message: String },

    /// Desired state could not be computed from the current inputs.
    #[error("unable to compute desired state: {0}")]
    Computation(String),

    /// Network or API server failure.
    #[error("Kubernetes API error: {0}")]
    Transport(#[from] kube::Error),

    /// A caller broke the contract of the core, e.g. deleting an unowned object.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("timed out waiting for caches to sync for {0}")]
    CacheSyncTimeout(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Classify a kube client error for the object addressed by `identity`.
    ///
    /// 404 maps to [`Error::NotFound`]; 409 splits into
    /// [`Error::AlreadyExists`] and [`Error::Conflict`] on the status reason.
    /// Everything else stays a transport error.
    pub fn from_kube(err: kube::Error, identity: &Identity) -> Self {
        match err {
            kube::Error::Api(ErrorResponse { code: 404, .. }) => Error::NotFound(identity.to_string()),
            kube::Error::Api(ErrorResponse {
                code: 409, reason, ..
            }) if reason == "AlreadyExists" => Error::AlreadyExists(identity.to_string()),
            kube::Error::Api(ErrorResponse {
                code: 409, message, ..
            }) => Error::Conflict {
                identity: identity.to_string(),
                message,
            },
            other => Error::Transport(other),
        }
    }

    pub fn computation(reason: impl Into<String>) -> Self {
        Error::Computation(reason.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    /// Whether the run-loop should requeue the key after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Invariant(_)
                | Error::CacheSyncTimeout(_)
                | Error::Config(_)
                | Error::InvalidConfig(_)
        )
    }
}
