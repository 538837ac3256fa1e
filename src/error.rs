//! Error types shared by every rebus component.

use std::time::Duration;

/// Result type for rebus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error produced by a local method or property implementation.
///
/// Any error type works; types registered with the
/// [`ErrorMap`](crate::exceptions::ErrorMap) travel over the bus under
/// their remote name and are rebuilt on the proxy side.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures owned by the transport rather than the remote application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("name {0} is already owned by another connection")]
    NameTaken(String),

    #[error("object path {0} is already exported")]
    PathInUse(String),

    #[error("transport i/o failure: {0}")]
    Io(String),
}

/// Errors that can occur while declaring, exporting or calling remote objects.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or ambiguous declarations. Raised while building a type,
    /// never at call time.
    #[error("declaration error: {0}")]
    Declaration(String),

    /// Remote application error with a registered local type.
    #[error("{name}: {message}")]
    Remote {
        name: String,
        message: String,
        local: HandlerError,
    },

    /// Remote error whose name has no local mapping.
    #[error("unmapped remote error {name}: {message}")]
    UnmappedRemote { name: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The remote object is gone (or never existed).
    #[error("unknown remote object {path} on {service}")]
    UnknownObject { service: String, path: String },

    /// Write attempted on a property the caller may not write.
    #[error("property {property} is read-only: {reason}")]
    Access {
        property: String,
        reason: &'static str,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A remote member name that the registry does not know.
    #[error("member {0} is not declared by the registry")]
    UnmappedMember(String),

    /// A local attribute name that the registry does not know.
    #[error("unknown member {0}")]
    UnknownMember(String),

    /// A value or argument list does not match the declared signature.
    #[error("signature mismatch: expected '{expected}', got '{actual}'")]
    Signature { expected: String, actual: String },
}

impl Error {
    /// Convenience constructor for `Declaration`.
    pub fn declaration(message: impl Into<String>) -> Self {
        Self::Declaration(message.into())
    }

    /// Convenience constructor for `Signature`.
    pub fn signature(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Signature {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Convenience constructor for `Access`.
    pub fn access(property: impl Into<String>, reason: &'static str) -> Self {
        Self::Access {
            property: property.into(),
            reason,
        }
    }

    /// Returns `true` for transient errors a caller may retry.
    ///
    /// Only timeouts and transport i/o hiccups qualify. Remote application
    /// errors, access errors and declaration errors will fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(TransportError::Io(_))
        )
    }

    /// The remote error name, for mapped and unmapped remote errors.
    pub fn remote_name(&self) -> Option<&str> {
        match self {
            Self::Remote { name, .. } | Self::UnmappedRemote { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Borrow the mapped local error, if this is a `Remote` error of type `E`.
    pub fn downcast_remote<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Remote { local, .. } => local.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_error_display() {
        let err = Error::declaration("bad interface name");
        assert_eq!(err.to_string(), "declaration error: bad interface name");
    }

    #[test]
    fn test_signature_error_display() {
        let err = Error::signature("s", "x");
        assert_eq!(err.to_string(), "signature mismatch: expected 's', got 'x'");
    }

    #[test]
    fn test_retryable_variants() {
        assert!(Error::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(Error::Transport(TransportError::Io("reset".into())).is_retryable());
        assert!(!Error::Transport(TransportError::Closed).is_retryable());
        assert!(!Error::access("prop", "read-only property").is_retryable());
        assert!(!Error::UnmappedRemote {
            name: "org.example.Error".into(),
            message: "boom".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_remote_name() {
        let err = Error::UnmappedRemote {
            name: "org.example.Nothing".into(),
            message: "gone".into(),
        };
        assert_eq!(err.remote_name(), Some("org.example.Nothing"));
        assert_eq!(Error::Timeout(Duration::ZERO).remote_name(), None);
    }

    #[test]
    fn test_downcast_remote() {
        #[derive(Debug, thiserror::Error)]
        #[error("custom")]
        struct Custom;

        let err = Error::Remote {
            name: "org.example.Custom".into(),
            message: "custom".into(),
            local: Box::new(Custom),
        };
        assert!(err.downcast_remote::<Custom>().is_some());
        assert!(err.downcast_remote::<std::fmt::Error>().is_none());
    }
}
