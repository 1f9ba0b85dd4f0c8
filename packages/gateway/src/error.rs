//! Error types for the gateway.

use crate::command::Reply;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An atomic replace was aborted because another session modified the
    /// key after it was watched. Safe to retry.
    #[error("write conflict: '{key}' was modified concurrently")]
    WriteConflict { key: String },

    #[error("session is not open")]
    NotOpen,

    #[error("session is already open")]
    AlreadyOpen,

    #[error("invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    /// The store answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected reply, expected {expected}: {reply:?}")]
    UnexpectedReply { expected: &'static str, reply: Reply },

    /// Failure in the underlying connection.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is a write conflict the caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }

    pub fn transport(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Transport(error.into())
    }

    pub(crate) fn unexpected(expected: &'static str, reply: Reply) -> Self {
        Error::UnexpectedReply { expected, reply }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn conflict_is_distinguished() {
        let e = Error::WriteConflict {
            key: "user:1".to_string(),
        };
        assert!(e.is_conflict());
        assert!(e.to_string().contains("user:1"));
        assert!(!Error::NotOpen.is_conflict());
    }

    #[test]
    fn io_error_converts_to_transport() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Transport(_)));
        assert!(StdError::source(&e).is_some());
        assert!(e.to_string().contains("reset"));
    }

    #[test]
    fn transport_from_message() {
        let e = Error::transport("broken pipe");
        assert_eq!(e.to_string(), "transport error: broken pipe");
    }
}
