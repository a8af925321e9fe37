//! Lutron adapter error types.

use homehub_app::ports::TransportError;
use homehub_domain::error::CommandError;

#[derive(Debug, thiserror::Error)]
pub enum LutronError {
    /// No integration protocol is known for this model number.
    #[error("unsupported lutron model {0}")]
    UnknownModel(String),

    /// The bridge refused the login or password.
    #[error("bridge rejected login {0:?}")]
    BadLogin(String),

    /// The bridge hung up before showing the expected prompt.
    #[error("connection closed while waiting for {0:?}")]
    UnexpectedEof(&'static str),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl From<LutronError> for TransportError {
    fn from(err: LutronError) -> Self {
        match err {
            LutronError::Io(err) => Self::Io(err),
            LutronError::BadLogin(_) => Self::Auth(err.to_string()),
            LutronError::UnexpectedEof(_) => Self::Closed,
            LutronError::UnknownModel(_) => Self::Protocol(err.to_string()),
        }
    }
}

impl From<LutronError> for CommandError {
    fn from(err: LutronError) -> Self {
        Self::unsupported(err.to_string())
    }
}
