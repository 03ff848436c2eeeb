use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use tagwire_frame::{
    Frame, FrameConfig, FrameError, FrameKind, FrameReader, FrameWriter, MessageType, ERROR,
    UNCORRELATED,
};
use tagwire_transport::{TransportError, WireStream};
use tracing::{debug, error, info, warn};

use crate::error::{ConnectionError, Result};
use crate::handler::{ErrorHook, HandlerResult, LogErrorHook};
use crate::registry::{HandlerEntry, TypeRegistry};

/// Lifecycle of a [`Connection`]: `Created → Open → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Stream attached, receive loop not started.
    Created,
    /// Receive loop running; frames may be sent.
    Open,
    /// Shutdown in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Created => "created",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the connection this end is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Client => "client",
            Role::Server => "server",
        })
    }
}

/// Per-connection behavior.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Frame limits and socket timeouts. A read timeout acts as an idle
    /// timeout: the connection closes when no frame arrives in time.
    pub frame: FrameConfig,
    /// Send locally detected failures back to the peer as `ERROR` responses.
    pub report_errors_to_peer: bool,
    /// Receives payloads dispatched to the built-in `ERROR` entry.
    pub error_hook: Arc<dyn ErrorHook>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            report_errors_to_peer: true,
            error_hook: Arc::new(LogErrorHook),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("frame", &self.frame)
            .field("report_errors_to_peer", &self.report_errors_to_peer)
            .finish_non_exhaustive()
    }
}

struct PendingRequest {
    correlation: u32,
    reply: SyncSender<Frame>,
}

struct Shared {
    id: String,
    role: Role,
    peer_addr: Option<SocketAddr>,
    state: Mutex<ConnectionState>,
    reader: Mutex<Option<FrameReader<WireStream>>>,
    writer: Mutex<FrameWriter<WireStream>>,
    // Separate handle used only to shut the socket down, so close never waits
    // on a writer blocked mid-frame.
    control: WireStream,
    registry: Arc<TypeRegistry>,
    config: ConnectionConfig,
    pending: Mutex<Option<PendingRequest>>,
    request_lock: Mutex<()>,
    next_correlation: AtomicU32,
    worker: Mutex<Option<JoinHandle<()>>>,
}

// Held only by user-facing handles, never by the receive loop, so dropping
// the last handle closes the connection.
struct LastHandle(Arc<Shared>);

impl Drop for LastHandle {
    fn drop(&mut self) {
        if self.0.shutdown() {
            debug!(peer = %self.0.id, "last handle dropped");
        }
    }
}

/// One live stream plus the receive loop dispatching its frames.
///
/// `Connection` is a cheap handle; clones refer to the same stream. Frames
/// are read and dispatched on a dedicated thread, strictly one at a time, so
/// a handler's response is written before the next frame is read. Sending
/// is allowed from any thread; writes are serialised so frames never
/// interleave. Dropping the last handle closes the connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    _last: Arc<LastHandle>,
}

impl Connection {
    /// Wrap a connected stream. The connection starts in
    /// [`ConnectionState::Created`]; call [`start`](Self::start) to open it.
    pub fn new(
        id: impl Into<String>,
        stream: WireStream,
        role: Role,
        registry: Arc<TypeRegistry>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let peer_addr = stream.peer_addr();
        let control = stream.try_clone()?;
        let reader = FrameReader::with_config_stream(stream.try_clone()?, config.frame.clone())?;
        let writer = FrameWriter::with_config_stream(stream, config.frame.clone())?;

        let shared = Arc::new(Shared {
            id: id.into(),
            role,
            peer_addr,
            state: Mutex::new(ConnectionState::Created),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(writer),
            control,
            registry,
            config,
            pending: Mutex::new(None),
            request_lock: Mutex::new(()),
            next_correlation: AtomicU32::new(1),
            worker: Mutex::new(None),
        });
        Ok(Self {
            _last: Arc::new(LastHandle(Arc::clone(&shared))),
            shared,
        })
    }

    /// Open the connection and spawn its receive loop.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let mut state = lock(&shared.state);
            if *state != ConnectionState::Created {
                return Err(ConnectionError::InvalidState {
                    action: "start",
                    state: *state,
                });
            }
            *state = ConnectionState::Open;
        }

        let reader = lock(&shared.reader)
            .take()
            .ok_or(ConnectionError::InvalidState {
                action: "start",
                state: ConnectionState::Closed,
            })?;

        let loop_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("tagwire-conn-{}", shared.id))
            .spawn(move || loop_shared.run(reader));

        match spawned {
            Ok(handle) => {
                *lock(&shared.worker) = Some(handle);
                info!(peer = %shared.id, role = %shared.role, "connection open");
                Ok(())
            }
            Err(err) => {
                shared.shutdown();
                Err(TransportError::Io(err).into())
            }
        }
    }

    /// Send a request frame. The peer dispatches it and may answer.
    pub fn send(&self, tag: impl AsRef<str>, payload: &[u8]) -> Result<()> {
        let tag = MessageType::new(tag)?;
        self.shared.write(FrameKind::Request, UNCORRELATED, &tag, payload)
    }

    /// Send a response frame. The peer dispatches it but never answers.
    pub fn respond(&self, tag: impl AsRef<str>, payload: &[u8]) -> Result<()> {
        let tag = MessageType::new(tag)?;
        self.shared.write(FrameKind::Response, UNCORRELATED, &tag, payload)
    }

    /// Send a request and wait for the matching response.
    ///
    /// The request carries a fresh correlation value; only a response
    /// echoing it completes the call, either with the same tag or as an
    /// `ERROR` report. Replies to earlier sends or to requests that already
    /// timed out are dispatched to handlers but never returned here.
    /// Requests on one connection are serialised.
    pub fn request(
        &self,
        tag: impl AsRef<str>,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Bytes> {
        let tag = MessageType::new(tag)?;
        let shared = &self.shared;
        let _serial = lock(&shared.request_lock);

        let correlation = shared.next_correlation();
        let (reply, replies) = mpsc::sync_channel(1);
        *lock(&shared.pending) = Some(PendingRequest { correlation, reply });

        if let Err(err) = shared.write(FrameKind::Request, correlation, &tag, payload) {
            lock(&shared.pending).take();
            return Err(err);
        }

        let outcome = match replies.recv_timeout(timeout) {
            Ok(frame) if frame.tag == ERROR && tag != ERROR => Err(ConnectionError::Remote(
                String::from_utf8_lossy(&frame.payload).into_owned(),
            )),
            Ok(frame) => Ok(frame.payload),
            Err(RecvTimeoutError::Timeout) => Err(ConnectionError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ConnectionError::Disconnected(shared.id.clone()))
            }
        };
        lock(&shared.pending).take();
        outcome
    }

    /// Close the connection. Safe to call repeatedly and from any state.
    ///
    /// The socket is shut down in both directions, which unblocks the
    /// receive loop; use [`wait`](Self::wait) to join it.
    pub fn close(&self) {
        self.shared.shutdown();
    }

    /// Block until the receive loop has exited. Returns immediately when
    /// called from the receive loop itself or before [`start`](Self::start).
    pub fn wait(&self) {
        let handle = {
            let mut worker = lock(&self.shared.worker);
            let on_loop_thread = worker
                .as_ref()
                .is_some_and(|handle| handle.thread().id() == thread::current().id());
            if on_loop_thread {
                return;
            }
            worker.take()
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(peer = %self.shared.id, "receive loop panicked");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Remote address for TCP connections.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .field("peer_addr", &self.shared.peer_addr)
            .finish()
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn next_correlation(&self) -> u32 {
        loop {
            let value = self.next_correlation.fetch_add(1, Ordering::Relaxed);
            if value != UNCORRELATED {
                return value;
            }
        }
    }

    fn write(
        &self,
        kind: FrameKind,
        correlation: u32,
        tag: &MessageType,
        payload: &[u8],
    ) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ConnectionError::NotOpen(state));
        }

        let sent = lock(&self.writer).send_correlated(kind, correlation, tag, payload);
        match sent {
            Ok(()) => {
                info!(
                    peer = %self.id,
                    %tag,
                    kind = kind.as_str(),
                    size = payload.len(),
                    "frame sent"
                );
                Ok(())
            }
            // Rejected before anything reached the socket.
            Err(err @ FrameError::PayloadTooLarge { .. }) => Err(err.into()),
            Err(err) => {
                warn!(peer = %self.id, %tag, error = %err, "write failed, closing connection");
                self.shutdown();
                Err(err.into())
            }
        }
    }

    /// Move to `Closed`. Returns false when another caller got there first.
    fn shutdown(&self) -> bool {
        {
            let mut state = lock(&self.state);
            match *state {
                ConnectionState::Closing | ConnectionState::Closed => return false,
                ConnectionState::Created | ConnectionState::Open => {
                    *state = ConnectionState::Closing;
                }
            }
        }

        if let Err(err) = self.control.shutdown() {
            debug!(peer = %self.id, error = %err, "socket shutdown failed");
        }
        lock(&self.reader).take();
        // Dropping the sender wakes a waiting request with `Disconnected`.
        lock(&self.pending).take();

        *lock(&self.state) = ConnectionState::Closed;
        info!(peer = %self.id, "connection closed");
        true
    }

    fn run(&self, mut reader: FrameReader<WireStream>) {
        while self.state() == ConnectionState::Open {
            match reader.read_frame() {
                Ok(frame) => self.dispatch(frame),
                Err(FrameError::ConnectionClosed) => {
                    debug!(peer = %self.id, "peer closed the stream");
                    break;
                }
                Err(err) if err.is_framing() => {
                    let desync = err.desynchronizes_stream();
                    self.report(&ConnectionError::Frame(err), UNCORRELATED);
                    if desync {
                        break;
                    }
                }
                Err(err) => {
                    if self.state() == ConnectionState::Open {
                        warn!(peer = %self.id, error = %err, "read failed");
                    }
                    break;
                }
            }
        }
        self.shutdown();
    }

    fn dispatch(&self, frame: Frame) {
        info!(
            peer = %self.id,
            tag = %frame.tag,
            kind = frame.kind.as_str(),
            size = frame.payload.len(),
            "frame received"
        );
        match frame.kind {
            FrameKind::Request => self.dispatch_request(frame),
            FrameKind::Response => self.dispatch_response(frame),
        }
    }

    fn dispatch_request(&self, frame: Frame) {
        let Some(entry) = self.registry.lookup(frame.tag.as_str()) else {
            self.report(
                &ConnectionError::UnknownType(frame.tag.to_string()),
                frame.correlation,
            );
            return;
        };

        match self.invoke(&entry, &frame.tag, &frame.payload) {
            Ok(Some(reply)) => {
                let sent = self.write(FrameKind::Response, frame.correlation, &frame.tag, &reply);
                if let Err(err) = sent {
                    debug!(peer = %self.id, tag = %frame.tag, error = %err, "response not sent");
                }
            }
            Ok(None) => {}
            Err(err) => self.report(&err, frame.correlation),
        }
    }

    fn dispatch_response(&self, frame: Frame) {
        // Responses reach the local handler for observation only; answering
        // them could start a reply loop between two peers.
        match self.registry.lookup(frame.tag.as_str()) {
            Some(entry) => {
                if let Err(err) = self.invoke(&entry, &frame.tag, &frame.payload) {
                    warn!(peer = %self.id, error = %err, "response handler failed");
                }
            }
            None => debug!(peer = %self.id, tag = %frame.tag, "no handler for response"),
        }

        if frame.correlation == UNCORRELATED {
            return;
        }
        let mut pending = lock(&self.pending);
        match pending.take_if(|p| p.correlation == frame.correlation) {
            Some(request) => {
                let _ = request.reply.try_send(frame);
            }
            None => debug!(
                peer = %self.id,
                tag = %frame.tag,
                correlation = frame.correlation,
                "discarding late response"
            ),
        }
    }

    /// Run one entry, turning handler errors and panics into `Handler` errors.
    fn invoke(
        &self,
        entry: &HandlerEntry,
        tag: &MessageType,
        payload: &[u8],
    ) -> Result<Option<Bytes>> {
        let hook = self.config.error_hook.as_ref();
        let outcome: thread::Result<HandlerResult> =
            catch_unwind(AssertUnwindSafe(|| entry.invoke(payload, &self.id, hook)));

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(ConnectionError::Handler {
                tag: tag.to_string(),
                message: err.to_string(),
            }),
            Err(panic) => Err(ConnectionError::Handler {
                tag: tag.to_string(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Route a locally detected failure to the `ERROR` entry and, if
    /// configured, to the peer as a response to the offending frame.
    fn report(&self, err: &ConnectionError, correlation: u32) {
        let description = err.to_string();
        error!(peer = %self.id, kind = ?err.kind(), error = %description, "dispatch failed");

        let error_tag = MessageType::error();
        match self.registry.lookup(ERROR) {
            Some(entry) => {
                if let Err(hook_err) = self.invoke(&entry, &error_tag, description.as_bytes()) {
                    warn!(peer = %self.id, error = %hook_err, "error handler failed");
                }
            }
            None => self
                .config
                .error_hook
                .handle_error(&self.id, description.as_bytes()),
        }

        if self.config.report_errors_to_peer {
            if let Err(send_err) = self.write(
                FrameKind::Response,
                correlation,
                &error_tag,
                description.as_bytes(),
            ) {
                debug!(peer = %self.id, error = %send_err, "error report not sent");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
