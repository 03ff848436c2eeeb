use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::WireStream;

/// TCP transport.
///
/// Provides bind/accept/connect over TCP. The listener can be switched to
/// non-blocking mode so an accept loop can poll a stop flag between attempts.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on `host:port`. Port 0 picks an ephemeral port.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = resolve(host, port)?;
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking unless non-blocking mode is set).
    pub fn accept(&self) -> Result<(WireStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        configure_accepted(&stream)?;
        debug!(%addr, "accepted connection");
        Ok((stream.into(), addr))
    }

    /// Accept without blocking.
    ///
    /// Returns `Ok(None)` when no connection is pending. Requires
    /// [`TcpTransport::set_nonblocking`] to have been enabled.
    pub fn try_accept(&self) -> Result<Option<(WireStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                configure_accepted(&stream)?;
                debug!(%addr, "accepted connection");
                Ok(Some((stream.into(), addr)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Toggle non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    /// Connect to a listening peer (blocking).
    pub fn connect(host: &str, port: u16) -> Result<WireStream> {
        Self::connect_timeout(host, port, None)
    }

    /// Connect with an optional timeout on the TCP handshake.
    pub fn connect_timeout(host: &str, port: u16, timeout: Option<Duration>) -> Result<WireStream> {
        let addr = resolve(host, port)?;
        let stream = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected over tcp");
        Ok(stream.into())
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

fn configure_accepted(stream: &TcpStream) -> Result<()> {
    // Accepted sockets inherit non-blocking mode from the listener on some platforms.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let display = format!("{host}:{port}");
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: display.clone(),
            source: e,
        })?
        .next()
        .ok_or(TransportError::Unresolved(display))
}
