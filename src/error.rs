//! Error types for lifecache
//!
//! All modules use `LifecacheResult<T>` as their return type.

use crate::resource::Capability;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for lifecache operations
pub type LifecacheResult<T> = Result<T, LifecacheError>;

/// All errors that can occur in lifecache
#[derive(Error, Debug)]
pub enum LifecacheError {
    // Entity errors
    #[error("{capability} not implemented by this entity")]
    NotImplemented { capability: Capability },

    #[error("Readiness check failed for {key}: {source}")]
    CheckFailed {
        key: String,
        #[source]
        source: Arc<LifecacheError>,
    },

    #[error("{key} was released before it became ready")]
    Released { key: String },

    #[error("{capability} failed for {key}: {reason}")]
    OperationFailed {
        capability: Capability,
        key: String,
        reason: String,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LifecacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create the error a resource returns when a primitive rejects
    pub fn operation(
        capability: Capability,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            capability,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create the error for a primitive the resource never supplied
    pub fn not_implemented(capability: Capability) -> Self {
        Self::NotImplemented { capability }
    }

    /// Capability named by the error, if any
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Self::NotImplemented { capability } | Self::OperationFailed { capability, .. } => {
                Some(*capability)
            }
            Self::CheckFailed { .. } => Some(Capability::Check),
            _ => None,
        }
    }

    /// Whether the error only says a capability is missing
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotImplemented { .. } => {
                Some("Implement the capability on the resource or add a fallback provider")
            }
            Self::ConfigInvalid { .. } | Self::TomlParse(_) => {
                Some("Run: lifecache config init --force")
            }
            Self::User(msg) if msg.starts_with("Unknown config key") => {
                Some("Run: lifecache config --help")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = LifecacheError::not_implemented(Capability::GetData);
        assert_eq!(err.to_string(), "getData not implemented by this entity");
    }

    #[test]
    fn check_failed_keeps_cause() {
        let cause = Arc::new(LifecacheError::operation(Capability::Check, "a", "missing"));
        let err = LifecacheError::CheckFailed {
            key: "a".to_string(),
            source: cause,
        };
        assert!(err.to_string().contains("missing"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.capability(), Some(Capability::Check));
    }

    #[test]
    fn error_hint() {
        let err = LifecacheError::not_implemented(Capability::Scan);
        assert!(err.hint().is_some());
        assert!(LifecacheError::Internal("x".into()).hint().is_none());
    }
}
