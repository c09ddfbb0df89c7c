//! TCP client session.
//!
//! Wraps one client socket with separate bind and connect steps. Once
//! connected, the session never silently reconnects: beginning a transaction
//! towards a different endpoint is a state error.
//!
//! ## State Machine
//!
//! ```text
//!                 bind()                     connect()
//!   [Unconnected] ──────> [Unconnected+bound] ─────────> [Connecting] ──> [Connected]
//!         │                                                  │ (failure)
//!         │                                                  v
//!         │                                           [Unconnected]
//!         │ close()                                     (bind kept)
//!         v
//!     [Closed]  <──────────────── close() from any state
//! ```

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::tcp::Connection;
use super::{Session, TcpTransaction, TransportKind};
use crate::address::same_endpoint;
use crate::error::{NetError, Result};

#[derive(Debug)]
enum ClientState {
    Unconnected {
        socket: Option<Socket>,
        bind_addr: Option<SocketAddr>,
    },
    Connecting,
    Connected(Arc<Connection>),
    Closed,
}

/// TCP client session.
#[derive(Debug)]
pub struct TcpClientSession {
    state: Mutex<ClientState>,
    connect_timeout: Option<Duration>,
}

fn new_socket(addr: SocketAddr) -> std::io::Result<Socket> {
    Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
}

fn bound_socket(addr: SocketAddr) -> Result<Socket> {
    let bind_err = |source| NetError::Bind {
        endpoint: addr,
        source,
    };
    let socket = new_socket(addr).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    Ok(socket)
}

impl TcpClientSession {
    /// Create an unbound, unconnected client session.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClientState::Unconnected {
                socket: None,
                bind_addr: None,
            }),
            connect_timeout: None,
        }
    }

    /// Create a client session bound to the local endpoint `local`.
    pub fn bind(local: SocketAddr) -> Result<Self> {
        let session = Self::new();
        session.bind_local(local)?;
        Ok(session)
    }

    /// Bind to `local`, then connect to `remote`.
    pub fn bind_and_connect(local: SocketAddr, remote: SocketAddr) -> Result<Self> {
        let session = Self::bind(local)?;
        session.connect(remote)?;
        Ok(session)
    }

    /// Create a session connected to `remote` from an ephemeral local port.
    pub fn connect_to(remote: SocketAddr) -> Result<Self> {
        let session = Self::new();
        session.connect(remote)?;
        Ok(session)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            state: Mutex::new(ClientState::Connected(Connection::new(stream))),
            connect_timeout: None,
        }
    }

    /// Timeout applied by every connect made through this session,
    /// including the one in [`begin_transaction_to`](Session::begin_transaction_to).
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bind the client socket to a local endpoint before connecting.
    pub fn bind_local(&self, local: SocketAddr) -> Result<()> {
        let mut state = self.state.lock();
        match &mut *state {
            ClientState::Unconnected {
                socket: socket @ None,
                bind_addr,
            } => {
                *socket = Some(bound_socket(local)?);
                *bind_addr = Some(local);
                tracing::debug!(%local, "TCP client bound");
                Ok(())
            }
            ClientState::Unconnected { .. } => Err(NetError::State(
                "the client socket is already bound".to_string(),
            )),
            ClientState::Connecting | ClientState::Connected(_) => Err(NetError::State(
                "the client socket is already connected".to_string(),
            )),
            ClientState::Closed => Err(closed()),
        }
    }

    /// Connect to `remote`, blocking until established or failed.
    ///
    /// Connecting again to the endpoint already connected is a no-op.
    pub fn connect(&self, remote: SocketAddr) -> Result<()> {
        self.establish(remote, self.connect_timeout).map(|_| ())
    }

    /// Connect to `remote`, failing once `timeout` elapses.
    pub fn connect_timeout(&self, remote: SocketAddr, timeout: Duration) -> Result<()> {
        self.establish(remote, Some(timeout)).map(|_| ())
    }

    /// Remote endpoint of the connection, if connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            ClientState::Connected(connection) => connection.peer(),
            _ => None,
        }
    }

    /// Whether the session holds a connection.
    pub fn is_connected(&self) -> bool {
        matches!(&*self.state.lock(), ClientState::Connected(_))
    }

    fn establish(&self, remote: SocketAddr, timeout: Option<Duration>) -> Result<Arc<Connection>> {
        let (socket, bind_addr) = {
            let mut state = self.state.lock();
            let taken = match &mut *state {
                ClientState::Connected(connection) => {
                    return match connection.peer() {
                        Some(peer) if same_endpoint(&peer, &remote) => Ok(Arc::clone(connection)),
                        peer => Err(NetError::State(format!(
                            "Failed to connect {}: the current client socket has already connected to server {:?}.",
                            remote, peer
                        ))),
                    };
                }
                ClientState::Connecting => {
                    return Err(NetError::State(
                        "a connect is already in progress".to_string(),
                    ))
                }
                ClientState::Closed => return Err(closed()),
                ClientState::Unconnected { socket, bind_addr } => (socket.take(), *bind_addr),
            };
            *state = ClientState::Connecting;
            taken
        };

        // lock released: connect may block
        let result = connect_socket(socket, bind_addr, remote, timeout);

        let mut state = self.state.lock();
        let still_connecting = matches!(&*state, ClientState::Connecting);
        match result {
            Ok(stream) if still_connecting => {
                let connection = Connection::new(stream);
                tracing::debug!(%remote, local = ?connection.local_addr(), "TCP client connected");
                *state = ClientState::Connected(Arc::clone(&connection));
                Ok(connection)
            }
            Ok(stream) => {
                // closed while connecting
                if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                    tracing::trace!("Abandoned connection shutdown: {}", e);
                }
                Err(closed())
            }
            Err(e) if still_connecting => {
                tracing::debug!(%remote, "TCP client connect failed: {}", e);
                *state = ClientState::Unconnected {
                    socket: None,
                    bind_addr,
                };
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn connect_socket(
    socket: Option<Socket>,
    bind_addr: Option<SocketAddr>,
    remote: SocketAddr,
    timeout: Option<Duration>,
) -> Result<TcpStream> {
    // a socket whose previous connect failed is not reusable; rebind a fresh one
    let socket = match (socket, bind_addr) {
        (Some(socket), _) => socket,
        (None, Some(local)) => bound_socket(local)?,
        (None, None) => new_socket(remote).map_err(|source| NetError::Connect {
            endpoint: remote,
            source,
        })?,
    };
    let connected = match timeout {
        Some(timeout) => socket.connect_timeout(&remote.into(), timeout),
        None => socket.connect(&remote.into()),
    };
    connected.map_err(|source| NetError::Connect {
        endpoint: remote,
        source,
    })?;
    Ok(socket.into())
}

fn closed() -> NetError {
    NetError::State("the TCP client session is closed".to_string())
}

impl Default for TcpClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for TcpClientSession {
    type Tx = TcpTransaction;

    fn kind(&self) -> TransportKind {
        TransportKind::TcpClient
    }

    fn begin_transaction(&self) -> Result<TcpTransaction> {
        match &*self.state.lock() {
            ClientState::Connected(connection) if connection.is_closed() => Err(NetError::State(
                "the client connection has been shut down".to_string(),
            )),
            ClientState::Connected(connection) => Ok(TcpTransaction::new(
                Arc::clone(connection),
                TransportKind::TcpClient,
            )),
            ClientState::Closed => Err(closed()),
            _ => Err(NetError::State(
                "no remote endpoint configured for the client session".to_string(),
            )),
        }
    }

    fn begin_transaction_to(&self, endpoint: SocketAddr) -> Result<TcpTransaction> {
        let connection = self.establish(endpoint, self.connect_timeout)?;
        if connection.is_closed() {
            return Err(NetError::State(
                "the client connection has been shut down".to_string(),
            ));
        }
        Ok(TcpTransaction::new(connection, TransportKind::TcpClient))
    }

    fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), ClientState::Closed);
        match previous {
            ClientState::Connected(connection) => {
                tracing::debug!(peer = ?connection.peer(), "TCP client session closed");
                connection
                    .shutdown()
                    .map_err(|e| NetError::close("TCP client session", e))
            }
            _ => Ok(()),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            ClientState::Unconnected {
                socket: Some(socket),
                ..
            } => socket.local_addr().ok().and_then(|addr| addr.as_socket()),
            ClientState::Connected(connection) => connection.local_addr(),
            _ => None,
        }
    }
}
