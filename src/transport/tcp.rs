//! TCP transaction.
//!
//! A TCP transaction leases one established connection. For the server role
//! each accepted peer gets its own connection; for the client role every
//! transaction leases the session's single connection, so beginning a new
//! transaction never reconnects.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::SockRef;

use super::{SocketInfo, Transaction, TransportKind, DEFAULT_TCP_RECEIVE_BUFFER};
use crate::address::same_endpoint;
use crate::error::{NetError, Result};

/// An established TCP connection shared by a session and its transactions.
///
/// Shutdown takes the stream out, so the descriptor is released as soon as
/// reads and writes already in flight return.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: Mutex<Option<Arc<TcpStream>>>,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream) -> Arc<Self> {
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        Arc::new(Self {
            stream: Mutex::new(Some(Arc::new(stream))),
            peer,
            local,
        })
    }

    pub(crate) fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.stream.lock().is_none()
    }

    fn stream(&self) -> Result<Arc<TcpStream>> {
        self.stream
            .lock()
            .clone()
            .ok_or_else(|| NetError::State("the TCP connection is closed".to_string()))
    }

    /// Shut down both directions once; later calls are no-ops.
    ///
    /// A peer that already went away is not a failure.
    pub(crate) fn shutdown(&self) -> io::Result<()> {
        let Some(stream) = self.stream.lock().take() else {
            return Ok(());
        };
        let read = stream.shutdown(Shutdown::Read);
        let write = stream.shutdown(Shutdown::Write);
        for result in [read, write] {
            match result {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

/// A lease on one TCP connection.
#[derive(Debug)]
pub struct TcpTransaction {
    kind: TransportKind,
    connection: Arc<Connection>,
    end_of_stream: AtomicBool,
}

impl TcpTransaction {
    pub(crate) fn new(connection: Arc<Connection>, kind: TransportKind) -> Self {
        Self {
            kind,
            connection,
            end_of_stream: AtomicBool::new(false),
        }
    }

    /// Whether a read has observed the end of the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let stream = self.connection.stream()?;
        let mut stream: &TcpStream = &stream;
        stream
            .write_all(data)
            .and_then(|()| stream.flush())
            .map_err(|e| NetError::transmission("write to TCP stream", e))
    }
}

impl Transaction for TcpTransaction {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.connection.peer()
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        self.write(data)
    }

    fn send_to(&self, endpoint: Option<SocketAddr>, data: &[u8]) -> Result<()> {
        if let Some(endpoint) = endpoint {
            let connected = self
                .connection
                .peer()
                .is_some_and(|peer| same_endpoint(&peer, &endpoint));
            if !connected {
                return Err(NetError::State(format!(
                    "TCP transaction is connected to {:?}, cannot send to {}.",
                    self.connection.peer(),
                    endpoint
                )));
            }
        }
        self.write(data)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketInfo)> {
        let stream = self.connection.stream()?;
        let mut stream: &TcpStream = &stream;
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.end_of_stream.store(true, Ordering::Release);
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(NetError::transmission("read from TCP stream", e)),
            }
        }
        Ok((filled, SocketInfo::new(self.kind, self.connection.peer())))
    }

    fn has_next(&self) -> bool {
        !self.connection.is_closed() && !self.is_end_of_stream()
    }

    fn allocate_receive_buffer(&self) -> Result<Vec<u8>> {
        let Ok(stream) = self.connection.stream() else {
            return Ok(Vec::new());
        };
        let size = match SockRef::from(&*stream).recv_buffer_size() {
            Ok(size) if size > 0 => size,
            Ok(_) => DEFAULT_TCP_RECEIVE_BUFFER,
            Err(e) => {
                tracing::debug!(
                    "Receive buffer size unavailable ({}), using {}",
                    e,
                    DEFAULT_TCP_RECEIVE_BUFFER
                );
                DEFAULT_TCP_RECEIVE_BUFFER
            }
        };
        Ok(vec![0; size])
    }

    fn close(&self) -> Result<()> {
        self.connection
            .shutdown()
            .map_err(|e| NetError::close("TCP transaction", e))
    }
}
