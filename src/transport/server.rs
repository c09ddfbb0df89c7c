//! TCP server session.
//!
//! Wraps one listening socket. [`begin_transaction`](Session::begin_transaction)
//! blocks in accept until a peer connects; the server never chooses its peer,
//! so the endpoint given to `begin_transaction_to` is ignored.

use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use super::tcp::Connection;
use super::{Session, TcpTransaction, TransportKind};
use crate::error::{NetError, Result};

/// Listen backlog used when none is given.
pub const DEFAULT_BACKLOG: i32 = 50;

#[derive(Debug)]
enum ListenerState {
    Unbound,
    Listening(Arc<TcpListener>),
    Closed,
}

/// TCP server session.
#[derive(Debug)]
pub struct TcpServerSession {
    state: Mutex<ListenerState>,
    accepted: Mutex<Vec<Weak<Connection>>>,
}

fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let bind_err = |source| NetError::Bind {
        endpoint: addr,
        source,
    };
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    let backlog = if backlog < 1 { DEFAULT_BACKLOG } else { backlog };
    socket.listen(backlog).map_err(bind_err)?;
    Ok(socket.into())
}

impl TcpServerSession {
    /// Create an unbound server session; call [`listen`](Self::listen) before accepting.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListenerState::Unbound),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Create a server session listening on `addr` with the default backlog.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_backlog(addr, DEFAULT_BACKLOG)
    }

    /// Create a server session listening on `addr`.
    ///
    /// A backlog below 1 selects [`DEFAULT_BACKLOG`].
    pub fn bind_with_backlog(addr: SocketAddr, backlog: i32) -> Result<Self> {
        let session = Self::new();
        session.listen(addr, backlog)?;
        Ok(session)
    }

    /// Wrap an existing listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            state: Mutex::new(ListenerState::Listening(Arc::new(listener))),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Bind an unbound session and start listening.
    pub fn listen(&self, addr: SocketAddr, backlog: i32) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ListenerState::Unbound => {}
            ListenerState::Listening(_) => {
                return Err(NetError::State(
                    "the server socket is already bound".to_string(),
                ))
            }
            ListenerState::Closed => {
                return Err(NetError::State("the TCP server session is closed".to_string()))
            }
        }
        let listener = listen(addr, backlog)?;
        tracing::info!(
            "TCP server listening on {}",
            listener.local_addr().unwrap_or(addr)
        );
        *state = ListenerState::Listening(Arc::new(listener));
        Ok(())
    }

    fn listener(&self) -> Result<Arc<TcpListener>> {
        match &*self.state.lock() {
            ListenerState::Listening(listener) => Ok(Arc::clone(listener)),
            ListenerState::Unbound => Err(NetError::State(
                "the server socket is not bound".to_string(),
            )),
            ListenerState::Closed => {
                Err(NetError::State("the TCP server session is closed".to_string()))
            }
        }
    }

    fn track(&self, connection: &Arc<Connection>) {
        let mut accepted = self.accepted.lock();
        accepted.retain(|weak| weak.strong_count() > 0);
        accepted.push(Arc::downgrade(connection));
    }
}

impl Default for TcpServerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for TcpServerSession {
    type Tx = TcpTransaction;

    fn kind(&self) -> TransportKind {
        TransportKind::TcpServer
    }

    fn begin_transaction(&self) -> Result<TcpTransaction> {
        let listener = self.listener()?;
        let (stream, peer) = listener.accept().map_err(|e| {
            NetError::transmission("Unable to begin a transaction: accept failed", e)
        })?;
        tracing::debug!(%peer, "TCP server accepted connection");
        let connection = Connection::new(stream);
        self.track(&connection);
        Ok(TcpTransaction::new(connection, TransportKind::TcpServer))
    }

    fn begin_transaction_to(&self, _endpoint: SocketAddr) -> Result<TcpTransaction> {
        self.begin_transaction()
    }

    fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), ListenerState::Closed);
        if let ListenerState::Listening(listener) = previous {
            // wakes a thread blocked in accept on platforms that support it
            if let Err(e) = SockRef::from(&*listener).shutdown(Shutdown::Both) {
                tracing::trace!("Listener shutdown: {}", e);
            }
            tracing::debug!(local = ?listener.local_addr().ok(), "TCP server session closed");
        }

        let accepted = std::mem::take(&mut *self.accepted.lock());
        let mut first_error = None;
        for connection in accepted.iter().filter_map(Weak::upgrade) {
            if let Err(e) = connection.shutdown() {
                tracing::warn!(peer = ?connection.peer(), "Failed to shut down accepted connection: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(NetError::close("accepted TCP connections", e)),
            None => Ok(()),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            ListenerState::Listening(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transaction;
    use std::io::Write;
    use std::net::TcpStream;
    use std::thread;

    #[test]
    fn test_bind_and_accept() {
        let server = TcpServerSession::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
            stream
        });

        let tx = server.begin_transaction().unwrap();
        let mut buf = [0u8; 4];
        let (n, info) = tx.receive(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"ping");
        assert_eq!(info.kind, TransportKind::TcpServer);

        let stream = client.join().unwrap();
        assert_eq!(info.source, stream.local_addr().ok());
    }

    #[test]
    fn test_unbound_cannot_accept() {
        let server = TcpServerSession::new();
        assert!(server.local_addr().is_none());
        assert!(server.begin_transaction().unwrap_err().is_state());

        server.listen("127.0.0.1:0".parse().unwrap(), 0).unwrap();
        assert!(server.local_addr().is_some());
        assert!(server
            .listen("127.0.0.1:0".parse().unwrap(), 0)
            .unwrap_err()
            .is_state());
    }

    #[test]
    fn test_close_is_idempotent() {
        let server = TcpServerSession::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        server.close().unwrap();
        server.close().unwrap();
        assert!(server.local_addr().is_none());
        assert!(server.begin_transaction().unwrap_err().is_state());
    }

    #[test]
    fn test_close_invalidates_accepted_transactions() {
        let server = TcpServerSession::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());

        let tx = server.begin_transaction().unwrap();
        let _stream = client.join().unwrap();
        assert!(tx.has_next());

        server.close().unwrap();
        assert!(!tx.has_next());
    }

    #[test]
    fn test_from_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = TcpServerSession::from_listener(listener);
        assert_eq!(server.local_addr(), Some(addr));
    }
}
