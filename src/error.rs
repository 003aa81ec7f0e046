//! # Error Handling
//!
//! This module defines the centralized error type for `vmr-flow`. It uses the
//! `thiserror` library to build a single `Error` enum that covers every
//! anticipated failure mode, with contextual fields on each variant.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum that represents all possible errors that can
//!   occur within the library.
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`, used
//!   throughout the library.
//!
//! Errors raised while talking to remote collaborators carry a `transient`
//! flag. [`Error::is_transient`] is what the policy engine and the work-item
//! queue use to tell a flaky network call from a decisive failure.

use thiserror::Error;

/// Main error type for vmr-flow operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error occurred while parsing a configuration or mapping file.
    ///
    /// This error includes the specific parsing issue and optionally a hint
    /// about how to fix it.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A source mapping was referenced that does not exist, or was used in a
    /// way its definition forbids.
    #[error("Source mapping error: {name} - {message}")]
    Mapping { name: String, message: String },

    /// An error occurred while cloning or fetching a Git repository.
    #[error("Git clone error for {url}@{r#ref}: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    GitClone {
        url: String,
        r#ref: String,
        message: String,
        /// Optional hint for how to resolve the clone issue
        hint: Option<String>,
    },

    /// An error occurred while executing a Git command.
    #[error("Git command failed for {url}: {command} - {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    /// A call to a remote collaborator (repository host, build registry)
    /// failed.
    #[error("Remote operation error: {url} - {message}")]
    Remote {
        url: String,
        message: String,
        /// Whether retrying the same call later may succeed
        transient: bool,
    },

    /// A requested entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Two copies of a version property could not be reconciled.
    #[error("Cannot reconcile property '{property}' ('{left}' vs '{right}'): {message}")]
    Reconciliation {
        property: String,
        left: String,
        right: String,
        message: String,
    },

    /// A dependency was added on one side of a flow and removed on the other.
    #[error("Conflicting updates of dependency '{name}': {message}")]
    ConflictingDependencyUpdate { name: String, message: String },

    /// A patch could only be applied partially; the working tree is left as is.
    #[error("Patch partially applied to {target}: {message}")]
    PatchApply { target: String, message: String },

    /// The source manifest is malformed or inconsistent.
    #[error("Source manifest error: {message}")]
    Manifest { message: String },

    /// A version file (props or XML) is malformed.
    #[error("Version file error in {file}: {message}")]
    VersionFile { file: String, message: String },

    /// A merge policy could not be resolved or configured.
    #[error("Merge policy error: {policy} - {message}")]
    Policy { policy: String, message: String },

    /// The work-item queue rejected an operation.
    #[error("Work queue error: {message}")]
    Queue { message: String },

    /// The operation observed a cancellation request.
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// An error occurred with an in-memory filesystem operation.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A lock was poisoned by a panicking holder.
    #[error("Lock poisoning error: {message}")]
    LockPoisoned { message: String },
}

impl Error {
    /// Whether the failure may go away on retry.
    ///
    /// Only remote calls and lock contention are retryable; a missing
    /// resource is decisive.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Remote { transient, .. } => *transient,
            Error::GitClone { .. } | Error::LockPoisoned { .. } => true,
            _ => false,
        }
    }

    /// Shorthand for a transient remote failure.
    pub fn remote(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Remote {
            url: url.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }
}

/// Result type alias for vmr-flow operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_error_with_hint() {
        let error = Error::ConfigParse {
            message: "missing field `mappings`".to_string(),
            hint: Some("add a `mappings` array".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "Configuration parsing error: missing field `mappings`\n  hint: add a `mappings` array"
        );
    }

    #[test]
    fn test_config_parse_error_without_hint() {
        let error = Error::ConfigParse {
            message: "bad".to_string(),
            hint: None,
        };
        assert_eq!(error.to_string(), "Configuration parsing error: bad");
    }

    #[test]
    fn test_reconciliation_error_names_both_values() {
        let error = Error::Reconciliation {
            property: "FooVersion".to_string(),
            left: "$(Foo)".to_string(),
            right: "1.0.0".to_string(),
            message: "not a semantic version".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("FooVersion"));
        assert!(text.contains("$(Foo)"));
        assert!(text.contains("1.0.0"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::remote("https://github.com/dotnet/runtime", "timeout").is_transient());
        assert!(!Error::Remote {
            url: "u".to_string(),
            message: "404".to_string(),
            transient: false,
        }
        .is_transient());
        assert!(!Error::not_found("Build", 42).is_transient());
        assert!(!Error::Manifest {
            message: "x".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(
            Error::not_found("Subscription", "abc").to_string(),
            "Subscription not found: abc"
        );
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: Error = io.into();
        assert!(matches!(error, Error::Io(_)));
        assert!(error.to_string().starts_with("I/O error"));
    }
}
