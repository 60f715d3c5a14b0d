//! Error types for the hcloud reconciliation engine.
//!
//! The hierarchy follows the reconciliation lifecycle: configuration parsing
//! and validation, state storage, the remote Hetzner Cloud API, planning,
//! and plan execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the reconciliation engine.
#[derive(Debug, Error)]
pub enum HcloudError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Hetzner Cloud API errors.
    #[error("Hetzner Cloud API error: {0}")]
    Api(#[from] ApiError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A resource declaration failed validation.
    #[error("{}", validation_message(.message, .field.as_deref()))]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field path that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

fn validation_message(message: &str, field: Option<&str>) -> String {
    match field {
        Some(field) => format!("validation failed at {field}: {message}"),
        None => format!("validation failed: {message}"),
    }
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Filesystem error while reading or writing state.
    #[error("State storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Hetzner Cloud API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failure, rate limiting or a 5xx answer. Safe to retry.
    #[error("transient API failure{}: {message}", status_suffix(.status))]
    Transient {
        /// HTTP status code, absent for network failures.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// The API refused the request (4xx other than 404 and 429).
    #[error("request rejected ({status} {code}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code supplied by the API.
        code: String,
        /// Human-readable reason supplied by the API.
        message: String,
    },

    /// The addressed object does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind that was addressed.
        kind: String,
        /// Remote identifier.
        id: u64,
    },

    /// The API answered with a body that could not be decoded.
    #[error("Invalid response from Hetzner Cloud API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Conflicting operations in plan.
    #[error("Conflicting operations in plan: {message}")]
    ConflictingOperations {
        /// Description of the conflict.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The imported object is not of the expected kind or shape.
    #[error("cannot import {id} into {address}: expected {expected}, found {found}")]
    ImportMismatch {
        /// Address the import targeted.
        address: String,
        /// Remote identifier that was imported.
        id: u64,
        /// Expected resource schema.
        expected: String,
        /// What was actually found.
        found: String,
    },

    /// Transient failures persisted past the retry budget.
    #[error("Giving up on {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Operation that failed.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transient error seen.
        last_error: String,
    },

    /// A cancellation signal stopped the worker before the operation ran.
    #[error("Cancelled before {operation} on {address}")]
    Cancelled {
        /// Address of the resource.
        address: String,
        /// Operation that was not started.
        operation: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, HcloudError>;

impl HcloudError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the failure is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Api(ApiError::Transient { .. }))
    }

    /// Returns true if the remote object was reported as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(ApiError::NotFound { .. }))
    }

    /// Turns a `NotFound` into a `Rejected`, leaving other errors untouched.
    ///
    /// Updates and imports address an object the caller believes exists, so
    /// its absence is a request error rather than a success.
    #[must_use]
    pub fn not_found_as_rejected(self) -> Self {
        match self {
            Self::Api(ApiError::NotFound { kind, id }) => Self::Api(ApiError::Rejected {
                status: 404,
                code: String::from("not_found"),
                message: format!("{kind} {id} does not exist"),
            }),
            other => other,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Returns the offending field path of a validation error.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationError { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = HcloudError::Api(ApiError::transient(Some(503), "unavailable"));
        assert!(err.is_transient());

        let err = HcloudError::Api(ApiError::rejected(422, "invalid_input", "bad port"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_not_found_as_rejected() {
        let err = HcloudError::Api(ApiError::NotFound {
            kind: String::from("firewall"),
            id: 7,
        });
        assert!(err.is_not_found());

        let converted = err.not_found_as_rejected();
        assert!(matches!(
            converted,
            HcloudError::Api(ApiError::Rejected { status: 404, .. })
        ));
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = ConfigError::validation("unknown protocol 'sctp'", "resources[0].attributes.rules[1].protocol");
        assert_eq!(err.field(), Some("resources[0].attributes.rules[1].protocol"));
        assert!(err.to_string().contains("rules[1].protocol"));
    }
}
