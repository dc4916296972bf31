//! Error taxonomy for a single session.
//!
//! Connection-level failures (`Io`, `Timeout`, `EndOfStream`, frame-level
//! `Decode`) end the session. `ProtocolMismatch` and `Filesystem` are
//! recovered at the operation boundary and reported in-band.

use std::time::Duration;

/// Error raised while exchanging frames or transfers with a peer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Socket-level read or write failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded read or write did not complete in time.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// The peer closed the connection.
    #[error("peer closed the connection")]
    EndOfStream,

    /// The peer sent a token other than the one this step requires.
    #[error("expected {expected:?}, got {actual:?}")]
    ProtocolMismatch { expected: String, actual: String },

    /// A file was missing, unwritable or unremovable.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// Malformed frame, length header or listing.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server had no free session slot.
    #[error("server is busy, try again later")]
    ServerBusy,
}

impl SessionError {
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        SessionError::ProtocolMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        SessionError::Decode(msg.into())
    }

    /// Whether the connection must be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::ProtocolMismatch { .. } | SessionError::Filesystem(_)
        )
    }

    /// Peer went away cleanly (not worth reporting as a failure).
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::EndOfStream => true,
            SessionError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors_are_not_fatal() {
        assert!(!SessionError::mismatch("ready_to_receive", "nope").is_fatal());
        assert!(!SessionError::Filesystem("missing".into()).is_fatal());
        assert!(SessionError::EndOfStream.is_fatal());
        assert!(SessionError::decode("bad header").is_fatal());
        assert!(SessionError::Timeout {
            op: "read",
            after: Duration::from_secs(1)
        }
        .is_fatal());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(SessionError::EndOfStream.is_disconnect());
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(SessionError::from(reset).is_disconnect());
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!SessionError::from(denied).is_disconnect());
    }
}
