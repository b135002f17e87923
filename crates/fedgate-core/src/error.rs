//! Error types for the Fedgate broker

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FedgateError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// The display name was never configured on the FederationDomain.
    #[error("identity provider not found: {name}")]
    IdentityProviderNotFound { name: String },

    /// The display name is configured but its UID has no live entry in
    /// the upstream registry right now.
    #[error("identity provider not available: {name}")]
    IdentityProviderNotAvailable { name: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Authentication rejected: {message}")]
    AuthRejected { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FedgateError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a reconcile pass that produced this error should be
    /// requeued. Configuration errors are terminal for the current
    /// generation; only environmental failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, FedgateError>;
