//! Error types for the provisioning engine.

use thiserror::Error;

use crate::account::AccountStatus;

/// Errors that can occur during provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Bad or missing input, the caller's fault.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Description of the issue.
        reason: String,
    },

    /// A uniqueness constraint was violated.
    #[error("{resource} already exists: {value}")]
    Conflict {
        /// Kind of resource (account name, contact address, ...).
        resource: &'static str,
        /// The conflicting value.
        value: String,
    },

    /// The referenced account or token does not exist.
    #[error("{resource} not found: {name}")]
    NotFound {
        /// Kind of resource.
        resource: &'static str,
        /// The name or token that was looked up.
        name: String,
    },

    /// The operation is illegal for the account's current status.
    #[error("cannot {operation} while account is {status}")]
    InvalidState {
        /// The attempted operation.
        operation: String,
        /// The account's current status.
        status: AccountStatus,
    },

    /// The address pool has no free suffix left.
    #[error("address pool exhausted ({low}-{high})")]
    PoolExhausted {
        /// Inclusive lower bound of the pool.
        low: u8,
        /// Inclusive upper bound of the pool.
        high: u8,
    },

    /// An external command failed, timed out, or could not be spawned.
    #[error("external tool '{command}' failed: {detail}")]
    ExternalTool {
        /// The command line that was invoked.
        command: String,
        /// Captured output or failure description.
        detail: String,
    },

    /// A download link exists but is no longer usable.
    #[error("download link gone: {reason}")]
    Gone {
        /// Why the link is unusable (expired or exhausted).
        reason: &'static str,
    },

    /// A storage primitive failed; the operation left no partial state.
    #[error(transparent)]
    Store(#[from] ovpnkit_store::StoreError),

    /// Encoding or decoding a persisted record failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ProvisionError {
    /// Creates a validation error.
    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict<V: Into<String>>(resource: &'static str, value: V) -> Self {
        Self::Conflict {
            resource,
            value: value.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found<N: Into<String>>(resource: &'static str, name: N) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state<O: Into<String>>(operation: O, status: AccountStatus) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            status,
        }
    }

    /// Creates an external-tool error.
    pub fn external_tool<C: Into<String>, D: Into<String>>(command: C, detail: D) -> Self {
        Self::ExternalTool {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization(message.into())
    }

    /// Error for a poisoned in-process mutex.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Store(ovpnkit_store::StoreError::Lock(format!(
            "{what} mutex poisoned"
        )))
    }
}

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;
