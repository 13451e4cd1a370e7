//! Error types for the memoization engine
//!
//! Every fallible operation in the crate returns [`MemoError`]. The enum is
//! `Clone` because a single computation outcome is delivered to every caller
//! that waited on the same key, and a negatively cached failure is handed out
//! again on every hit until it expires. Underlying errors are therefore
//! shared through [`SharedError`] instead of being owned by one caller.
//!
//! ## Error Classification
//!
//! [`ErrorClassification`] and [`ErrorSeverity`] give callers a uniform way
//! to decide how loudly to report a failure:
//!
//! | Variant | Severity | Retryable |
//! |---------|----------|-----------|
//! | `Configuration`, `KeyFormatting`, `Parse` | Error | no |
//! | `PointerResolution`, `CircularPointer`, `PathResolution` | Error | no |
//! | `Computation` | Warning | yes |
//! | `ResourceAcquisition` | Warning | yes |
//! | `ResourceRelease` | Warning | no |
//! | `ReleaseTimeout` | Warning | yes |
//! | `Cancelled` | Info | yes |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::time::ParseError;

/// Boxed error returned by user computations and resource hooks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reference-counted error shared between every observer of one failure
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Standard result type using [`MemoError`]
pub type MemoResult<T> = Result<T, MemoError>;

/// Errors produced by the cache engine
#[derive(Debug, Clone, Error)]
pub enum MemoError {
    /// One or more construction-time options are invalid
    #[error("Invalid cache configuration: {}", .messages.join("; "))]
    Configuration { messages: Vec<String> },

    /// Call arguments could not be turned into a cache key
    #[error("Unable to build cache key: {message}")]
    KeyFormatting { message: String },

    /// A pointer expiration could not be resolved against the cached value
    #[error("Unable to resolve expiration pointer '{path}': {message}")]
    PointerResolution { path: String, message: String },

    /// Expiration resolution did not settle within the step limit
    #[error("Expiration did not resolve after {depth} steps (circular pointer or callback chain)")]
    CircularPointer { depth: usize },

    /// An exit stack path is malformed or missing from the computed value
    #[error("Unable to resolve resource path '{path}': {message}")]
    PathResolution { path: String, message: String },

    /// The wrapped computation failed on every attempt
    #[error("Computation failed after {attempts} attempt(s): {source}")]
    Computation { attempts: u32, source: SharedError },

    /// Entering a managed resource failed
    #[error("Failed to acquire resource '{resource}': {source}")]
    ResourceAcquisition { resource: String, source: SharedError },

    /// Releasing one or more managed resources failed
    #[error("Failed to release {failures} resource(s): {source}")]
    ResourceRelease { failures: usize, source: SharedError },

    /// A time or duration expression could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Scheduled exit stack releases did not finish in time
    #[error("Exit stack close operations did not finish within {timeout:?}")]
    ReleaseTimeout { timeout: Duration },

    /// The in-flight computation was dropped before it produced a result
    #[error("Computation was cancelled before completion")]
    Cancelled,
}

impl MemoError {
    /// Create a configuration error with a single message
    #[must_use]
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration { messages: vec![message.into()] }
    }

    /// Create a key formatting error
    #[must_use]
    pub fn key_formatting<S: Into<String>>(message: S) -> Self {
        Self::KeyFormatting { message: message.into() }
    }

    /// Create a pointer resolution error
    #[must_use]
    pub fn pointer<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::PointerResolution { path: path.into(), message: message.into() }
    }

    /// Create a resource path resolution error
    #[must_use]
    pub fn path<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::PathResolution { path: path.into(), message: message.into() }
    }

    /// Wrap the final failure of a computation
    #[must_use]
    pub fn computation(attempts: u32, source: BoxError) -> Self {
        Self::Computation { attempts, source: Arc::from(source) }
    }

    /// Wrap a failed resource `enter` hook
    #[must_use]
    pub fn acquisition<S: Into<String>>(resource: S, source: BoxError) -> Self {
        Self::ResourceAcquisition { resource: resource.into(), source: Arc::from(source) }
    }

    /// Wrap failed resource `exit` hooks, keeping the first underlying error
    #[must_use]
    pub fn release(failures: usize, source: BoxError) -> Self {
        Self::ResourceRelease { failures, source: Arc::from(source) }
    }

    /// Number of attempts made when this is a computation failure
    #[must_use]
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::Computation { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Merge configuration errors so a builder can report every problem at once
    #[must_use]
    pub fn merge_configuration(errors: Vec<String>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self::Configuration { messages: errors })
        }
    }
}

/// Standard interface for classifying errors
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: calling the façade again may succeed.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;
}

impl ErrorClassification for MemoError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Computation { .. }
                | Self::ResourceAcquisition { .. }
                | Self::ReleaseTimeout { .. }
                | Self::Cancelled
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration { .. }
            | Self::KeyFormatting { .. }
            | Self::PointerResolution { .. }
            | Self::CircularPointer { .. }
            | Self::PathResolution { .. }
            | Self::Parse(_) => ErrorSeverity::Error,
            Self::Computation { .. }
            | Self::ResourceAcquisition { .. }
            | Self::ResourceRelease { .. }
            | Self::ReleaseTimeout { .. } => ErrorSeverity::Warning,
            Self::Cancelled => ErrorSeverity::Info,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for error handling functionality
    //!
    //! Tests cover constructors, display formatting, severity levels and
    //! retryability.

    use std::io;

    use super::*;

    /// Validates `MemoError::config` behavior for the single message scenario.
    ///
    /// Assertions:
    /// - Confirms `err.to_string()` equals `"Invalid cache configuration: maxsize
    ///   must be positive"`.
    /// - Ensures `!err.is_retryable()` evaluates to true.
    /// - Confirms `err.severity()` equals `ErrorSeverity::Error`.
    #[test]
    fn test_error_config_simple() {
        let err = MemoError::config("maxsize must be positive");
        assert_eq!(err.to_string(), "Invalid cache configuration: maxsize must be positive");
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    /// Validates `MemoError::merge_configuration` behavior for the multiple
    /// message scenario.
    ///
    /// Assertions:
    /// - Ensures an empty list produces no error.
    /// - Confirms messages are joined with `"; "`.
    #[test]
    fn test_merge_configuration_joins_messages() {
        assert!(MemoError::merge_configuration(Vec::new()).is_none());

        let err = MemoError::merge_configuration(vec!["a".into(), "b".into()]);
        assert_eq!(
            err.map(|e| e.to_string()),
            Some("Invalid cache configuration: a; b".to_string())
        );
    }

    /// Validates `MemoError::computation` behavior for the shared source
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the attempt count is exposed through `attempts()`.
    /// - Ensures clones share the same underlying error allocation.
    /// - Confirms the display text includes the source message.
    #[test]
    fn test_computation_error_is_shared_between_clones() {
        let err = MemoError::computation(3, Box::new(io::Error::other("backend down")));
        let clone = err.clone();

        assert_eq!(err.attempts(), Some(3));
        match (&err, &clone) {
            (
                MemoError::Computation { source: left, .. },
                MemoError::Computation { source: right, .. },
            ) => assert!(Arc::ptr_eq(left, right)),
            _ => panic!("expected computation errors"),
        }
        assert_eq!(err.to_string(), "Computation failed after 3 attempt(s): backend down");
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
    }

    /// Validates `ErrorSeverity` ordering and display.
    ///
    /// Assertions:
    /// - Ensures severities are ordered from `Info` to `Critical`.
    /// - Confirms `Warning` displays as `"WARN"`.
    #[test]
    fn test_severity_ordering_and_display() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
    }

    /// Validates `MemoError::Parse` conversion from `ParseError`.
    ///
    /// Assertions:
    /// - Confirms the display is transparent.
    #[test]
    fn test_parse_error_is_transparent() {
        let err: MemoError = ParseError::Unrecognised("soon".into()).into();
        assert_eq!(err.to_string(), "Unrecognised time expression: 'soon'");
        assert!(!err.is_critical());
    }
}
