//! Error types for provisioner controllers
//!
//! Errors are structured with fields so a reconciler can decide whether to
//! requeue, surface a status condition, or give up. Each variant carries the
//! context needed to find the offending object in a live cluster.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for provisioner operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A required object does not exist
    #[error("not_found: {kind} {name} not found")]
    NotFound {
        /// Kind of the missing object (e.g., "VirtualMachine")
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// An object could not be created because it already exists
    #[error("already exists: {kind} {name}")]
    AlreadyExists {
        /// Kind of the conflicting object
        kind: String,
        /// Name of the conflicting object
        name: String,
    },

    /// A retry ledger annotation exists but does not hold a valid entry
    #[error("corrupt retry ledger entry under {key}: {message}")]
    CorruptLedgerEntry {
        /// Annotation key the entry was read from
        key: String,
        /// Why the stored value was rejected
        message: String,
    },

    /// A configuration item could not be resolved from the environment hierarchy
    #[error("could not resolve config item with key {item}: {message}")]
    ConfigItem {
        /// The config key that was requested
        item: String,
        /// Description of what was searched
        message: String,
    },

    /// Validation error for object contents
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "data.instance-id")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "crd_install", "keygen")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for an object of the given kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for an object of the given kind
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a corrupt ledger entry error
    pub fn corrupt_ledger_entry(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CorruptLedgerEntry {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create an unresolved config item error
    pub fn config_item(item: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ConfigItem {
            item: item.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error means the requested object does not exist
    ///
    /// Covers both our own `NotFound` and a 404 returned by the API server.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error means a create lost a race against another writer
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Corrupt ledger entries, validation and serialization errors need a
    /// human (or another controller) to fix the object first. Missing
    /// objects may appear later, so those are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Don't retry on 4xx errors (validation, forbidden, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
                )
            }
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::CorruptLedgerEntry { .. } => false,
            Error::ConfigItem { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: Error Classification in Reconcilers
    // ==========================================================================

    /// Story: a corrupt ledger annotation is surfaced, not retried blindly
    ///
    /// Retrying cannot fix a malformed annotation; someone has to remove or
    /// repair it, so the reconciler should report it instead of hot-looping.
    #[test]
    fn story_corrupt_ledger_entry_is_not_retryable() {
        let err = Error::corrupt_ledger_entry("provision", "expected value at line 1");
        assert!(err.to_string().contains("corrupt retry ledger entry"));
        assert!(err.to_string().contains("provision"));
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
    }

    /// Story: missing objects are distinguishable from other failures
    #[test]
    fn story_not_found_errors_are_classified() {
        let err = Error::not_found("VirtualMachine", "vm-abc");
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("not_found:"));
        assert!(err.to_string().contains("vm-abc"));

        // A 404 from the API server counts as well
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::internal("boom").is_not_found());
    }

    /// Story: create races are recognized so callers can re-read
    #[test]
    fn story_already_exists_errors_are_classified() {
        assert!(Error::already_exists("ConfigMap", "id").is_already_exists());
        assert!(api_error(409).is_already_exists());
        assert!(!api_error(404).is_already_exists());
    }

    #[test]
    fn test_kube_error_retryability() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(404).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());
    }

    #[test]
    fn test_config_item_error() {
        let err = Error::config_item("password", "not in template mapping or environment specifics");
        assert!(err.to_string().contains("password"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_for_field() {
        let err = Error::validation_for_field("data.instance-id", "key missing");
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("data.instance-id"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_serialization_for_kind() {
        let err = Error::serialization_for_kind("LedgerEntry", "bad float");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("LedgerEntry")),
            _ => panic!("Expected Serialization variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error_context() {
        let err = Error::internal_with_context("crd_install", "apply rejected");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("crd_install"));
        assert!(err.to_string().contains("[crd_install]"));

        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }
}
