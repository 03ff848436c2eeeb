use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tagwire_frame::CHECK;
use tagwire_transport::{TcpTransport, WireStream};
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionConfig, ConnectionState, Role};
use crate::error::{ConnectionError, Result};
use crate::registry::TypeRegistry;

/// Client behavior.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Limit on the TCP handshake. `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
    /// Used by [`Client::request`] and [`Client::check_connection`].
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            connect_timeout: Some(Duration::from_secs(5)),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// One outgoing connection.
///
/// Frames the server sends back are dispatched through the client's own
/// registry on the connection's receive thread, independent of the caller.
pub struct Client {
    registry: Arc<TypeRegistry>,
    config: ClientConfig,
    connection: Mutex<Option<Connection>>,
}

impl Client {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            config: ClientConfig::default(),
            connection: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to `host:port` and start the receive loop.
    pub fn open(&self, host: &str, port: u16) -> Result<()> {
        self.ensure_not_open()?;
        let stream = TcpTransport::connect_timeout(host, port, self.config.connect_timeout)?;
        self.attach(stream, format!("{host}:{port}"))
    }

    /// Use a stream obtained elsewhere, e.g. one half of a Unix socket pair.
    pub fn attach(&self, stream: WireStream, id: impl Into<String>) -> Result<()> {
        let mut slot = lock(&self.connection);
        if let Some(existing) = slot.as_ref().filter(|conn| conn.is_open()) {
            return Err(ConnectionError::InvalidState {
                action: "open",
                state: existing.state(),
            });
        }

        let conn = Connection::new(
            id,
            stream,
            Role::Client,
            Arc::clone(&self.registry),
            self.config.connection.clone(),
        )?;
        conn.start()?;
        info!(peer = conn.id(), "client connected");
        *slot = Some(conn);
        Ok(())
    }

    /// Send a request frame without waiting. Any reply is dispatched
    /// through the client's registry.
    pub fn send_data(&self, tag: impl AsRef<str>, payload: &[u8]) -> Result<()> {
        self.current()?.send(tag, payload)
    }

    /// Send a request frame and wait for its response payload.
    pub fn request(&self, tag: impl AsRef<str>, payload: &[u8]) -> Result<Bytes> {
        self.current()?
            .request(tag, payload, self.config.request_timeout)
    }

    /// Liveness check: sends `CHECK` and waits for the acknowledgement.
    pub fn check_connection(&self) -> bool {
        match self.request(CHECK, b"") {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "liveness check failed");
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|conn| conn.is_open())
    }

    /// Handle to the current connection, if one was opened.
    pub fn connection(&self) -> Option<Connection> {
        lock(&self.connection).clone()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Close the connection and join its receive loop. Idempotent.
    pub fn close(&self) {
        let conn = lock(&self.connection).take();
        if let Some(conn) = conn {
            conn.close();
            conn.wait();
        }
    }

    fn current(&self) -> Result<Connection> {
        lock(&self.connection)
            .clone()
            .ok_or(ConnectionError::NotOpen(ConnectionState::Created))
    }

    fn ensure_not_open(&self) -> Result<()> {
        match lock(&self.connection).as_ref() {
            Some(conn) if conn.is_open() => Err(ConnectionError::InvalidState {
                action: "open",
                state: ConnectionState::Open,
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::server::Server;

    fn server_registry() -> Arc<TypeRegistry> {
        let registry = TypeRegistry::new();
        registry
            .register_fn("CUSTOM", |_| Ok(Some(Bytes::from_static(b"Response data"))))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn send_before_open_is_not_open() {
        let client = Client::new(Arc::new(TypeRegistry::new()));
        assert!(!client.is_open());
        assert!(client.connection().is_none());
        assert!(matches!(
            client.send_data("CUSTOM", b""),
            Err(ConnectionError::NotOpen(_))
        ));
        assert!(!client.check_connection());
    }

    #[test]
    fn connect_failure_is_a_transport_error() {
        // Bind then drop to find a port nobody listens on.
        let port = TcpTransport::bind("127.0.0.1", 0).unwrap().local_addr().port();
        let client = Client::new(Arc::new(TypeRegistry::new()));
        let err = client.open("127.0.0.1", port).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
        assert!(!client.is_open());
    }

    #[test]
    fn request_and_check_against_server() {
        let server = Server::new(server_registry());
        let addr = server.open("127.0.0.1", 0).unwrap();

        let client = Client::new(Arc::new(TypeRegistry::new()));
        client.open("127.0.0.1", addr.port()).unwrap();
        assert!(client.is_open());
        assert_eq!(client.connection().unwrap().role(), Role::Client);

        assert!(client.check_connection());
        let reply = client.request("CUSTOM", b"Hello").unwrap();
        assert_eq!(reply.as_ref(), b"Response data");

        client.close();
        client.close();
        assert!(!client.is_open());
        server.close();
    }

    #[test]
    fn replies_to_send_data_reach_client_handlers() {
        let server = Server::new(server_registry());
        let addr = server.open("127.0.0.1", 0).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let registry = TypeRegistry::new();
        registry
            .register_fn("CUSTOM", move |payload| {
                assert_eq!(payload, b"Response data");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .unwrap();

        let client = Client::new(Arc::new(registry));
        client.open("127.0.0.1", addr.port()).unwrap();
        client.send_data("CUSTOM", b"Hello").unwrap();
        // A request on the same connection completes after the earlier reply.
        assert!(client.check_connection());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reopen_after_close() {
        let server = Server::new(server_registry());
        let addr = server.open("127.0.0.1", 0).unwrap();
        let client = Client::new(Arc::new(TypeRegistry::new()));

        client.open("127.0.0.1", addr.port()).unwrap();
        assert!(matches!(
            client.open("127.0.0.1", addr.port()),
            Err(ConnectionError::InvalidState { .. })
        ));
        client.close();
        client.open("127.0.0.1", addr.port()).unwrap();
        assert!(client.check_connection());
    }

    #[test]
    fn server_shutdown_is_observed() {
        let server = Server::new(server_registry());
        let addr = server.open("127.0.0.1", 0).unwrap();
        let client = Client::new(Arc::new(TypeRegistry::new()));
        client.open("127.0.0.1", addr.port()).unwrap();

        server.close();
        let conn = client.connection().unwrap();
        conn.wait();
        assert!(!client.is_open());
        assert!(!client.check_connection());
    }
}
