use bytes::Bytes;
use tracing::error;

/// Error returned by a handler. Any error type converts into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// `Ok(Some(bytes))` sends `bytes` back as a response with the same tag, even
/// when empty. `Ok(None)` sends nothing.
pub type HandlerResult = std::result::Result<Option<Bytes>, HandlerError>;

/// Processes the payload of one message type.
///
/// Handlers run on the receive thread of the connection that read the frame,
/// one frame at a time per connection. Different connections call the same
/// handler concurrently.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, payload: &[u8]) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&[u8]) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, payload: &[u8]) -> HandlerResult {
        self(payload)
    }
}

/// Receives error reports addressed to the built-in `ERROR` handler.
///
/// This is the extension point for error reporting: install a custom hook on
/// a [`ConnectionConfig`](crate::ConnectionConfig) to forward errors somewhere
/// other than the log. A handler registered for `ERROR` replaces the hook
/// entirely.
pub trait ErrorHook: Send + Sync + 'static {
    fn handle_error(&self, peer: &str, payload: &[u8]);
}

/// Default hook: logs the error description.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHook;

impl ErrorHook for LogErrorHook {
    fn handle_error(&self, peer: &str, payload: &[u8]) {
        error!(
            peer,
            error = %String::from_utf8_lossy(payload),
            "error reported"
        );
    }
}
