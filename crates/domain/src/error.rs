//! Common error types used across the workspace.
//!
//! Every failure that reaches a caller of the core carries a stable
//! [`ErrorKind`] plus a free-form message. Layers define their own typed
//! errors and convert into [`HubError`] via `#[from]`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No builder for the model, or the builder cannot translate the command.
    Unsupported,
    /// An id resolved to no device, zone, button or scene.
    UnknownEntity,
    /// Pool acquisition failed or timed out.
    TransportUnavailable,
    /// The device returned an error or the protocol write failed.
    DeviceRejected,
    /// The intake queue is full.
    Overloaded,
    /// The core is closing.
    Shutdown,
    /// Bug or unexpected state.
    Internal,
}

impl ErrorKind {
    /// HTTP status code the API boundary should answer with.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Unsupported | Self::UnknownEntity => 400,
            Self::Overloaded => 429,
            Self::Internal => 500,
            Self::DeviceRejected => 502,
            Self::TransportUnavailable | Self::Shutdown => 503,
        }
    }

    /// Stable identifier, identical to the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsupported => "Unsupported",
            Self::UnknownEntity => "UnknownEntity",
            Self::TransportUnavailable => "TransportUnavailable",
            Self::DeviceRejected => "DeviceRejected",
            Self::Overloaded => "Overloaded",
            Self::Shutdown => "Shutdown",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error for the homehub core.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A domain invariant was violated.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A command could not be dispatched or was rejected.
    #[error("{0}")]
    Command(#[from] CommandError),

    /// The host's persistence hook failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HubError {
    /// Classify this error.
    ///
    /// Validation failures are bad input and share the `Unsupported` kind
    /// (and its 400 status) at the boundary.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Unsupported,
            Self::NotFound(_) => ErrorKind::UnknownEntity,
            Self::Command(err) => err.kind,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`CommandError`] of the given kind.
    #[must_use]
    pub fn command(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Command(CommandError::new(kind, message))
    }
}

/// Invariant violations raised by builders and `validate` methods.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("model number must not be empty")]
    EmptyModel,

    #[error("address must not be empty")]
    EmptyAddress,

    #[error("level {0} is outside 0..=100")]
    LevelOutOfRange(f32),

    #[error("device must either be a hub or have a hub, not both")]
    AmbiguousTransport,

    #[error("device has neither a hub nor a connection")]
    NoTransport,

    #[error("pool capacity must be at least 1")]
    ZeroCapacity,

    #[error("duplicate feature address {0}")]
    DuplicateAddress(String),

    #[error("scene must not activate itself")]
    SelfReferencingScene,

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },
}

/// Lookup by id found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A classified command failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    #[must_use]
    pub fn unknown_entity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownEntity, message)
    }

    #[must_use]
    pub fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown, "command processor is shutting down")
    }
}

impl From<HubError> for CommandError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Command(inner) => inner,
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}
