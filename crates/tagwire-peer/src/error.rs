use crate::connection::ConnectionState;

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] tagwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] tagwire_frame::FrameError),

    /// The connection is not open for traffic.
    #[error("connection is {0}, not open")]
    NotOpen(ConnectionState),

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("cannot {action} a connection that is {state}")]
    InvalidState {
        action: &'static str,
        state: ConnectionState,
    },

    /// No handler is registered for the tag.
    #[error("no handler registered for message type {0}")]
    UnknownType(String),

    /// A handler failed or panicked.
    #[error("handler for {tag} failed: {message}")]
    Handler { tag: String, message: String },

    /// The peer answered with an `ERROR` frame.
    #[error("peer reported error: {0}")]
    Remote(String),

    /// The peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Broad classes of failure, used to decide how the receive loop reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed, short, or oversized frame.
    Framing,
    /// Socket-level failure or a connection that is not open.
    Transport,
    /// A user handler failed.
    Handler,
    /// No handler for the tag.
    UnknownType,
    /// The peer reported an error or did not answer in time.
    Remote,
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Frame(err) if err.is_framing() => ErrorKind::Framing,
            ConnectionError::Frame(_)
            | ConnectionError::Transport(_)
            | ConnectionError::NotOpen(_)
            | ConnectionError::InvalidState { .. }
            | ConnectionError::Disconnected(_) => ErrorKind::Transport,
            ConnectionError::UnknownType(_) => ErrorKind::UnknownType,
            ConnectionError::Handler { .. } => ErrorKind::Handler,
            ConnectionError::Remote(_) | ConnectionError::Timeout(_) => ErrorKind::Remote,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
