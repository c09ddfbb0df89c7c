//! UDP session and transaction.
//!
//! A [`UdpSession`] owns one datagram socket. Every [`UdpTransaction`] it
//! mints shares that socket; closing a transaction never closes the socket.
//!
//! The default peer ("connection") is kept by the session: directing a
//! transaction at an endpoint makes it the session's peer, sends without an
//! explicit endpoint go there, and receives discard datagrams from any other
//! source. Closing the transaction that established the peer clears it.

use std::io;
use std::net::{Shutdown, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::SockRef;

use super::fragment;
use super::{FragmentationPolicy, Session, SocketInfo, Transaction, TransportKind, MAX_UDP_PAYLOAD};
use crate::address::same_endpoint;
use crate::error::{NetError, Result};

/// Socket state shared between a session and its transactions.
///
/// The socket is taken out on close; calls already in flight keep their own
/// handle, so the descriptor is released once they return.
#[derive(Debug)]
struct UdpShared {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local: Option<SocketAddr>,
    peer: Mutex<Option<SocketAddr>>,
}

impl UdpShared {
    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .lock()
            .clone()
            .ok_or_else(|| NetError::State("the UDP session is closed".to_string()))
    }

    fn is_closed(&self) -> bool {
        self.socket.lock().is_none()
    }

    fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    /// Take the socket out and shut it down; `false` if already closed.
    ///
    /// Shutting down an unconnected datagram socket reports `NotConnected`
    /// on some platforms, which is not a failure.
    fn close(&self) -> io::Result<bool> {
        let Some(socket) = self.socket.lock().take() else {
            return Ok(false);
        };
        match SockRef::from(&*socket).shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(true),
        }
    }
}

/// Validate a maximum datagram length.
fn check_max_length(max_length: usize) -> Result<usize> {
    if (1..=MAX_UDP_PAYLOAD).contains(&max_length) {
        Ok(max_length)
    } else {
        Err(NetError::Config(format!(
            "The maxLength({}) shall be positive and within {}.",
            max_length, MAX_UDP_PAYLOAD
        )))
    }
}

/// UDP session wrapping one datagram socket.
#[derive(Debug)]
pub struct UdpSession {
    shared: Arc<UdpShared>,
    max_length: usize,
    policy: FragmentationPolicy,
}

impl UdpSession {
    /// Create a session bound to an ephemeral port on the IPv4 wildcard address.
    pub fn new() -> Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    /// Create a session bound to `addr`.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| NetError::Bind {
            endpoint: addr,
            source,
        })?;
        let session = Self::from_socket(socket);
        tracing::info!(
            "UDP session bound to {}",
            session.shared.local.unwrap_or(addr)
        );
        Ok(session)
    }

    /// Wrap an existing socket.
    ///
    /// A socket already connected at the OS level keeps its peer as the
    /// session's default peer.
    pub fn from_socket(socket: UdpSocket) -> Self {
        let local = socket.local_addr().ok();
        let peer = socket.peer_addr().ok();
        Self {
            shared: Arc::new(UdpShared {
                socket: Mutex::new(Some(Arc::new(socket))),
                local,
                peer: Mutex::new(peer),
            }),
            max_length: MAX_UDP_PAYLOAD,
            policy: FragmentationPolicy::default(),
        }
    }

    /// Set the fragmentation defaults applied to every transaction minted afterwards.
    pub fn with_fragmentation(
        mut self,
        max_length: usize,
        policy: FragmentationPolicy,
    ) -> Result<Self> {
        self.max_length = check_max_length(max_length)?;
        self.policy = policy;
        Ok(self)
    }

    /// Current default peer of the socket.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.peer()
    }

    fn transaction(&self, peer: Option<SocketAddr>) -> UdpTransaction {
        UdpTransaction {
            shared: Arc::clone(&self.shared),
            peer,
            max_length: Mutex::new(self.max_length),
            policy: Mutex::new(self.policy),
            closed: AtomicBool::new(false),
        }
    }
}

impl Session for UdpSession {
    type Tx = UdpTransaction;

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn begin_transaction(&self) -> Result<UdpTransaction> {
        self.shared.socket()?;
        Ok(self.transaction(self.shared.peer()))
    }

    fn begin_transaction_to(&self, endpoint: SocketAddr) -> Result<UdpTransaction> {
        self.shared.socket()?;
        *self.shared.peer.lock() = Some(endpoint);
        tracing::debug!(%endpoint, "UDP session directed at peer");
        Ok(self.transaction(Some(endpoint)))
    }

    fn close(&self) -> Result<()> {
        match self.shared.close() {
            Ok(true) => {
                tracing::debug!(local = ?self.shared.local, "UDP session closed");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(NetError::close("UDP session", e)),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        if self.shared.is_closed() {
            None
        } else {
            self.shared.local
        }
    }
}

/// A lease on a UDP session's socket.
#[derive(Debug)]
pub struct UdpTransaction {
    shared: Arc<UdpShared>,
    peer: Option<SocketAddr>,
    max_length: Mutex<usize>,
    policy: Mutex<FragmentationPolicy>,
    closed: AtomicBool,
}

impl UdpTransaction {
    /// Oversize policy applied on the next send.
    pub fn policy(&self) -> FragmentationPolicy {
        *self.policy.lock()
    }

    /// Change the oversize policy.
    pub fn set_policy(&self, policy: FragmentationPolicy) {
        *self.policy.lock() = policy;
    }

    /// Maximum datagram payload length.
    pub fn max_length(&self) -> usize {
        *self.max_length.lock()
    }

    /// Change the maximum datagram payload length; must be within `[1, 65507]`.
    pub fn set_max_length(&self, max_length: usize) -> Result<()> {
        *self.max_length.lock() = check_max_length(max_length)?;
        Ok(())
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetError::State("the UDP transaction is closed".to_string()));
        }
        self.shared.socket()
    }

    fn dispatch(&self, target: SocketAddr, data: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        let max_length = self.max_length();
        match self.policy() {
            FragmentationPolicy::Reject => {
                if data.len() > max_length {
                    return Err(NetError::PayloadTooLarge {
                        length: data.len(),
                        max_length,
                    });
                }
                send_datagram(&socket, target, data)
            }
            FragmentationPolicy::Subdivide => {
                if data.len() <= max_length {
                    return send_datagram(&socket, target, data);
                }
                tracing::debug!(
                    length = data.len(),
                    chunks = fragment::chunk_count(data.len(), max_length),
                    chunk_size = fragment::chunk_size(data.len(), max_length),
                    %target,
                    "Subdividing oversize UDP payload"
                );
                send_fragments(data, max_length, |chunk| {
                    send_datagram(&socket, target, chunk)
                })
            }
        }
    }
}

/// Send each fragment in order; the first failure aborts the rest.
fn send_fragments(
    data: &[u8],
    max_length: usize,
    mut send: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    for range in fragment::fragments(data.len(), max_length) {
        send(&data[range])?;
    }
    Ok(())
}

fn send_datagram(socket: &UdpSocket, target: SocketAddr, data: &[u8]) -> Result<()> {
    let sent = socket
        .send_to(data, target)
        .map_err(|e| NetError::transmission(format!("send to {}", target), e))?;
    if sent != data.len() {
        return Err(NetError::transmission(
            format!("send to {}", target),
            io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated: {} of {} bytes sent", sent, data.len()),
            ),
        ));
    }
    Ok(())
}

/// Receive one datagram, reporting whether it was cut to fit `buf`.
#[cfg(unix)]
#[allow(unsafe_code)]
fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, bool)> {
    use socket2::MaybeUninitSlice;
    use std::mem::MaybeUninit;

    // SAFETY: `MaybeUninit<u8>` has the layout of `u8`, and the kernel only
    // writes initialized bytes into the slice.
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    let mut bufs = [MaybeUninitSlice::new(uninit)];
    let (len, flags, source) = SockRef::from(socket).recv_from_vectored(&mut bufs)?;
    let source = source.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "datagram source is not an IP endpoint")
    })?;
    Ok((len, source, flags.is_truncated()))
}

/// Receive one datagram; an oversize datagram fails the receive here.
#[cfg(not(unix))]
fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, bool)> {
    socket.recv_from(buf).map(|(len, source)| (len, source, false))
}

impl Transaction for UdpTransaction {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        let target = self.peer.ok_or_else(|| {
            NetError::State("The current socket has not connected to a remote address.".to_string())
        })?;
        self.dispatch(target, data)
    }

    fn send_to(&self, endpoint: Option<SocketAddr>, data: &[u8]) -> Result<()> {
        match (self.peer, endpoint) {
            (Some(peer), Some(endpoint)) if !same_endpoint(&peer, &endpoint) => {
                Err(NetError::State(format!(
                    "Current socket is connected to {}, cannot send to {}.",
                    peer, endpoint
                )))
            }
            (_, Some(endpoint)) => self.dispatch(endpoint, data),
            (_, None) => self.send(data),
        }
    }

    fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketInfo)> {
        let capacity = buf.len();
        loop {
            let socket = self.socket()?;
            let received = recv_datagram(&socket, buf);
            if self.shared.is_closed() {
                return Err(NetError::State("the UDP session is closed".to_string()));
            }
            let (len, source, truncated) =
                received.map_err(|e| NetError::transmission("receive datagram", e))?;
            match self.shared.peer() {
                Some(peer) if !same_endpoint(&peer, &source) => {
                    tracing::trace!(%source, %peer, "Dropping datagram from non-peer source");
                }
                _ if truncated => {
                    return Err(NetError::transmission(
                        format!("receive datagram from {}", source),
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("datagram larger than the {}-byte receive buffer", capacity),
                        ),
                    ));
                }
                _ => return Ok((len, SocketInfo::new(TransportKind::Udp, Some(source)))),
            }
        }
    }

    fn has_next(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.shared.is_closed()
    }

    fn allocate_receive_buffer(&self) -> Result<Vec<u8>> {
        let Ok(socket) = self.socket() else {
            return Ok(Vec::new());
        };
        let size = match SockRef::from(&*socket).recv_buffer_size() {
            Ok(size) if size > 0 => size,
            Ok(_) => MAX_UDP_PAYLOAD,
            Err(e) => {
                tracing::debug!("Receive buffer size unavailable ({}), using {}", e, MAX_UDP_PAYLOAD);
                MAX_UDP_PAYLOAD
            }
        };
        Ok(vec![0; size])
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(peer) = self.peer {
            let mut shared_peer = self.shared.peer.lock();
            if shared_peer.is_some_and(|p| same_endpoint(&p, &peer)) {
                *shared_peer = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_session_bind() {
        let session = UdpSession::bind(loopback()).unwrap();
        let addr = session.local_addr().unwrap();
        assert!(addr.port() != 0);
        assert_eq!(session.kind(), TransportKind::Udp);
    }

    #[test]
    fn test_new_binds_ephemeral() {
        let session = UdpSession::new().unwrap();
        assert!(session.local_addr().is_some());
    }

    #[test]
    fn test_from_socket_keeps_os_peer() {
        let target = UdpSocket::bind(loopback()).unwrap();
        let socket = UdpSocket::bind(loopback()).unwrap();
        socket.connect(target.local_addr().unwrap()).unwrap();

        let session = UdpSession::from_socket(socket);
        assert_eq!(session.peer(), target.local_addr().ok());
    }

    #[test]
    fn test_send_without_peer_is_state_error() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session.begin_transaction().unwrap();
        let err = tx.send(b"hello").unwrap_err();
        assert!(err.is_state());
    }

    #[test]
    fn test_defaults() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session.begin_transaction().unwrap();
        assert_eq!(tx.max_length(), MAX_UDP_PAYLOAD);
        assert_eq!(tx.policy(), FragmentationPolicy::Subdivide);
    }

    #[test]
    fn test_max_length_bounds() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session.begin_transaction().unwrap();
        assert!(tx.set_max_length(0).is_err());
        assert!(tx.set_max_length(MAX_UDP_PAYLOAD + 1).is_err());
        assert!(tx.set_max_length(1).is_ok());
        assert!(tx.set_max_length(MAX_UDP_PAYLOAD).is_ok());
        assert_eq!(tx.max_length(), MAX_UDP_PAYLOAD);

        assert!(UdpSession::bind(loopback())
            .unwrap()
            .with_fragmentation(0, FragmentationPolicy::Reject)
            .is_err());
    }

    #[test]
    fn test_reject_oversize_sends_nothing() {
        let receiver = UdpSocket::bind(loopback()).unwrap();
        receiver.set_nonblocking(true).unwrap();

        let session = UdpSession::bind(loopback())
            .unwrap()
            .with_fragmentation(8, FragmentationPolicy::Reject)
            .unwrap();
        let tx = session
            .begin_transaction_to(receiver.local_addr().unwrap())
            .unwrap();

        match tx.send(&[7u8; 9]) {
            Err(NetError::PayloadTooLarge { length, max_length }) => {
                assert_eq!(length, 9);
                assert_eq!(max_length, 8);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }

        let mut buf = [0u8; 16];
        let err = receiver.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_send_to_other_peer_is_state_error() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session
            .begin_transaction_to("127.0.0.1:9".parse().unwrap())
            .unwrap();
        let err = tx
            .send_to(Some("127.0.0.1:10".parse().unwrap()), b"x")
            .unwrap_err();
        assert!(err.is_state());
    }

    #[test]
    fn test_close_clears_session_peer() {
        let session = UdpSession::bind(loopback()).unwrap();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let tx = session.begin_transaction_to(peer).unwrap();
        assert_eq!(session.peer(), Some(peer));

        tx.close().unwrap();
        assert_eq!(session.peer(), None);
        assert!(!tx.has_next());
        assert!(tx.send(b"x").unwrap_err().is_state());
        // socket stays usable for new transactions
        assert!(session.begin_transaction().is_ok());
    }

    #[test]
    fn test_session_close_invalidates_transactions() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session.begin_transaction().unwrap();
        assert!(tx.has_next());

        session.close().unwrap();
        session.close().unwrap();
        assert!(!tx.has_next());
        assert!(session.local_addr().is_none());
        assert!(tx.allocate_receive_buffer().unwrap().is_empty());
        assert!(session.begin_transaction().unwrap_err().is_state());
    }

    #[test]
    fn test_close_releases_socket_with_live_transaction() {
        let session = UdpSession::bind(loopback()).unwrap();
        let addr = session.local_addr().unwrap();
        let tx = session.begin_transaction_to("127.0.0.1:9".parse().unwrap()).unwrap();

        session.close().unwrap();
        let rebound = UdpSocket::bind(addr).unwrap();
        assert_eq!(rebound.local_addr().unwrap(), addr);

        let mut buf = [0u8; 8];
        assert!(tx.receive(&mut buf).unwrap_err().is_state());
        assert!(tx.send(b"x").unwrap_err().is_state());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_close_wakes_blocked_receive() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session.begin_transaction().unwrap();

        std::thread::scope(|scope| {
            let blocked = scope.spawn(|| {
                let mut buf = [0u8; 8];
                tx.receive(&mut buf)
            });
            std::thread::sleep(std::time::Duration::from_millis(100));
            session.close().unwrap();
            assert!(blocked.join().unwrap().unwrap_err().is_state());
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_oversize_datagram_is_transmission_error() {
        let session = UdpSession::bind(loopback()).unwrap();
        let sender = UdpSocket::bind(loopback()).unwrap();
        let target = session.local_addr().unwrap();
        let rx = session.begin_transaction().unwrap();

        sender.send_to(b"0123456789", target).unwrap();
        let mut buf = [0u8; 4];
        let err = rx.receive(&mut buf).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Transmission);
        assert!(err.to_string().contains("4-byte"));

        // the oversize datagram is consumed; the next one fits
        sender.send_to(b"ok", target).unwrap();
        let (n, info) = rx.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok");
        assert_eq!(info.source, sender.local_addr().ok());
    }

    #[test]
    fn test_send_fragments_stops_at_first_failure() {
        let data: Vec<u8> = (0..10).collect();
        let mut sent = Vec::new();
        let err = send_fragments(&data, 3, |chunk| {
            if sent.len() == 1 {
                return Err(NetError::transmission(
                    "send",
                    io::Error::new(io::ErrorKind::Other, "link down"),
                ));
            }
            sent.push(chunk.to_vec());
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.category(), crate::error::ErrorCategory::Transmission);
        assert_eq!(sent, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_send_fragments_covers_payload() {
        let data: Vec<u8> = (0..10).collect();
        let mut sent = Vec::new();
        send_fragments(&data, 3, |chunk| {
            sent.push(chunk.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(sent, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_allocate_receive_buffer() {
        let session = UdpSession::bind(loopback()).unwrap();
        let tx = session.begin_transaction().unwrap();
        assert!(!tx.allocate_receive_buffer().unwrap().is_empty());
    }
}
