use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tagwire_transport::{TcpTransport, TransportError, WireStream};
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionState, Role};
use crate::error::{ConnectionError, Result};
use crate::registry::TypeRegistry;

/// Host that binds every IPv4 interface.
pub const ANY_HOST: &str = "0.0.0.0";

/// Server behavior.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Applied to every accepted connection.
    pub connection: ConnectionConfig,
    /// Refuse sockets beyond this many live connections. `None` is unbounded.
    pub max_connections: Option<usize>,
    /// How long the accept loop sleeps when nothing is pending. Bounds how
    /// long [`Server::close`] waits for the loop to notice.
    pub accept_poll_interval: Duration,
    /// Pause after a failed accept before trying again.
    pub accept_error_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_connections: None,
            accept_poll_interval: Duration::from_millis(20),
            accept_error_backoff: Duration::from_millis(100),
        }
    }
}

struct ServerShared {
    registry: Arc<TypeRegistry>,
    config: ServerConfig,
    stop: AtomicBool,
    connections: Mutex<Vec<Connection>>,
    next_peer_id: AtomicU64,
}

struct Listening {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
}

/// Accepts TCP connections and serves each one on its own thread.
///
/// Every accepted socket becomes a [`Connection`] sharing the server's
/// registry. The accept loop runs on its own thread so serving existing
/// connections never blocks accepting new ones.
pub struct Server {
    shared: Arc<ServerShared>,
    listening: Mutex<Option<Listening>>,
}

impl Server {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::build(registry, ServerConfig::default())
    }

    /// Replace the server configuration. Call before [`open`](Self::open).
    pub fn with_config(self, config: ServerConfig) -> Self {
        self.close();
        Self::build(Arc::clone(&self.shared.registry), config)
    }

    fn build(registry: Arc<TypeRegistry>, config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                registry,
                config,
                stop: AtomicBool::new(false),
                connections: Mutex::new(Vec::new()),
                next_peer_id: AtomicU64::new(1),
            }),
            listening: Mutex::new(None),
        }
    }

    /// Bind `host:port` and start accepting. Returns the bound address, which
    /// differs from the request when `port` is 0.
    pub fn open(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let mut listening = lock(&self.listening);
        if listening.is_some() {
            return Err(ConnectionError::InvalidState {
                action: "open",
                state: ConnectionState::Open,
            });
        }

        let listener = TcpTransport::bind(host, port)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr();

        self.shared.stop.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let accept = thread::Builder::new()
            .name("tagwire-accept".to_string())
            .spawn(move || shared.accept_loop(listener))
            .map_err(TransportError::Io)?;

        *listening = Some(Listening { local_addr, accept });
        info!(%local_addr, "server open");
        Ok(local_addr)
    }

    /// Bind every IPv4 interface (`0.0.0.0`) on `port` and start accepting.
    pub fn open_any(&self, port: u16) -> Result<SocketAddr> {
        self.open(ANY_HOST, port)
    }

    /// Serve a stream obtained outside the accept loop, e.g. a Unix socket.
    pub fn attach(&self, stream: WireStream) -> Result<Connection> {
        let label = stream.peer_label();
        self.shared.admit(stream, &label)?.ok_or(ConnectionError::Disconnected(label))
    }

    /// Bound address while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.listening).as_ref().map(|l| l.local_addr)
    }

    pub fn is_open(&self) -> bool {
        lock(&self.listening).is_some()
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        lock(&self.shared.connections)
            .iter()
            .filter(|conn| conn.is_open())
            .count()
    }

    /// Snapshot of the open connections.
    pub fn connections(&self) -> Vec<Connection> {
        lock(&self.shared.connections)
            .iter()
            .filter(|conn| conn.is_open())
            .cloned()
            .collect()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Stop accepting, then close and join every connection. Idempotent.
    pub fn close(&self) {
        let listening = lock(&self.listening).take();
        if let Some(listening) = listening {
            self.shared.stop.store(true, Ordering::Release);
            if listening.accept.join().is_err() {
                error!("accept loop panicked");
            }
            info!(local_addr = %listening.local_addr, "server stopped accepting");
        }

        let connections = std::mem::take(&mut *lock(&self.shared.connections));
        for conn in &connections {
            conn.close();
        }
        for conn in &connections {
            conn.wait();
        }
        if !connections.is_empty() {
            info!(count = connections.len(), "server connections closed");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

impl ServerShared {
    fn accept_loop(&self, listener: TcpTransport) {
        while !self.stop.load(Ordering::Acquire) {
            match listener.try_accept() {
                Ok(Some((stream, addr))) => {
                    if let Err(err) = self.admit(stream, &addr.to_string()) {
                        error!(%addr, error = %err, "failed to start connection");
                    }
                }
                Ok(None) => thread::sleep(self.config.accept_poll_interval),
                Err(err) => {
                    error!(error = %err, "accept failed");
                    thread::sleep(self.config.accept_error_backoff);
                }
            }
        }
        debug!("accept loop exited");
    }

    /// Start a connection for `stream`. `Ok(None)` when the limit refused it.
    fn admit(&self, stream: WireStream, addr: &str) -> Result<Option<Connection>> {
        let mut connections = lock(&self.connections);
        connections.retain(|conn| conn.state() != ConnectionState::Closed);

        if let Some(max) = self.config.max_connections {
            if connections.len() >= max {
                warn!(addr, max, "connection limit reached, refusing");
                if let Err(err) = stream.shutdown() {
                    debug!(addr, error = %err, "refused socket shutdown failed");
                }
                return Ok(None);
            }
        }

        let id = format!("peer-{}", self.next_peer_id.fetch_add(1, Ordering::Relaxed));
        let conn = Connection::new(
            id,
            stream,
            Role::Server,
            Arc::clone(&self.registry),
            self.config.connection.clone(),
        )?;
        conn.start()?;
        info!(peer = conn.id(), addr, "accepted connection");

        connections.push(conn.clone());
        Ok(Some(conn))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
