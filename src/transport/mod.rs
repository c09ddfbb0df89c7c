//! Transport layer abstraction for MPNet.
//!
//! Three transport implementations sit behind one session/transaction
//! contract:
//! - **UDP**: one datagram socket, optional default peer, oversize policy
//! - **TCP server**: one listening socket, each transaction is an accepted peer
//! - **TCP client**: one connection, every transaction leases it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Caller / MultiSession          │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ begin_transaction()
//!      ┌─────────────┼──────────────┐
//!      ▼             ▼              ▼
//! ┌──────────┐ ┌────────────┐ ┌────────────┐
//! │UdpSession│ │TcpServer   │ │TcpClient   │
//! │          │ │Session     │ │Session     │
//! └────┬─────┘ └─────┬──────┘ └─────┬──────┘
//!      ▼             └──────┬───────┘
//! ┌──────────────┐   ┌──────────────┐
//! │UdpTransaction│   │TcpTransaction│
//! └──────────────┘   └──────────────┘
//! ```
//!
//! # Blocking model
//!
//! Every operation is a direct, potentially blocking call on the calling
//! thread: `begin_transaction` on a TCP server blocks in accept, `receive`
//! blocks until data arrives or (TCP) the stream ends. Only connect has a
//! timeout ([`TcpClientSession::connect_timeout`]).
//!
//! Closing a session or transaction from another thread is the only way to
//! abandon a blocked call. Close shuts the socket down and releases it once
//! in-flight calls return. For TCP this wakes a blocked reader, but bytes of a
//! partial read may already have been consumed. A blocked UDP `receive` is
//! woken on Linux and fails with a state error; on other platforms it may
//! wait for the next datagram before failing.
//!
//! A UDP `receive` into a buffer smaller than the arriving datagram fails
//! with a transmission error instead of truncating it.

mod client;
pub mod fragment;
mod server;
mod tcp;
mod udp;

pub use client::TcpClientSession;
pub use server::{TcpServerSession, DEFAULT_BACKLOG};
pub use tcp::TcpTransaction;
pub use udp::{UdpSession, UdpTransaction};

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Largest UDP payload: 65535 minus the 20-byte IP header and 8-byte UDP header.
pub const MAX_UDP_PAYLOAD: usize = 0xffff - 28;

/// Receive buffer size used for TCP when the socket cannot report its own.
pub const DEFAULT_TCP_RECEIVE_BUFFER: usize = 0xffff;

/// Transport kind of a session or transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Connectionless datagrams (default)
    #[default]
    Udp,
    /// Listening TCP socket, accepts peers
    TcpServer,
    /// Connecting TCP socket
    TcpClient,
    /// Adaptive session switching between the other kinds
    Multi,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::TcpServer => "tcp-server",
            Self::TcpClient => "tcp-client",
            Self::Multi => "multi",
        }
    }

    /// Whether this kind is one of the concrete socket transports.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, Self::Multi)
    }

    /// Whether this kind runs over TCP.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::TcpServer | Self::TcpClient)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp-server" | "tcp_server" | "server" => Ok(Self::TcpServer),
            "tcp-client" | "tcp_client" | "client" => Ok(Self::TcpClient),
            "multi" | "adaptive" => Ok(Self::Multi),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// Where received data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketInfo {
    /// Transport that delivered the data.
    pub kind: TransportKind,
    /// Source endpoint; for UDP this may differ on every receive.
    pub source: Option<SocketAddr>,
}

impl SocketInfo {
    /// Create a new socket info record.
    pub fn new(kind: TransportKind, source: Option<SocketAddr>) -> Self {
        Self { kind, source }
    }
}

/// How a UDP transaction handles payloads longer than its maximum length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentationPolicy {
    /// Fail the send and transmit nothing.
    Reject,
    /// Split into near-equal datagrams with no reassembly header.
    ///
    /// Fragments carry no sequence numbers and UDP does not order or
    /// guarantee them: a receiver sees independent datagrams and must
    /// tolerate loss and reordering itself, or senders must keep payloads
    /// at or below the maximum length when order matters.
    #[default]
    Subdivide,
}

impl std::str::FromStr for FragmentationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" | "exception" => Ok(Self::Reject),
            "subdivide" | "fragment" => Ok(Self::Subdivide),
            _ => Err(format!("Unknown fragmentation policy: {}", s)),
        }
    }
}

/// One exchange unit leased from a session's socket.
///
/// All methods take `&self` so that a transaction can be closed from another
/// thread while one is blocked in [`receive`](Transaction::receive).
pub trait Transaction: Send + Sync {
    /// Transport kind of this transaction.
    fn kind(&self) -> TransportKind;

    /// Default peer, if one is established.
    fn peer(&self) -> Option<SocketAddr>;

    /// Send to the default peer.
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Send to an explicit peer; `None` means the default peer.
    fn send_to(&self, endpoint: Option<SocketAddr>, data: &[u8]) -> Result<()>;

    /// Receive into `buf`, returning the number of bytes written and their source.
    ///
    /// TCP fills the whole buffer unless the stream ends first. UDP delivers
    /// exactly one datagram, which may be shorter than the buffer.
    fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketInfo)>;

    /// Whether more data may still arrive.
    fn has_next(&self) -> bool;

    /// Allocate a buffer sized from the socket's receive buffer.
    ///
    /// Empty when the socket is already closed.
    fn allocate_receive_buffer(&self) -> Result<Vec<u8>>;

    /// Release the transaction's transport-specific resources.
    fn close(&self) -> Result<()>;
}

/// Owner of one transport resource; mints transactions.
pub trait Session: Send + Sync {
    /// Transaction type minted by this session.
    type Tx: Transaction;

    /// Transport kind of this session.
    fn kind(&self) -> TransportKind;

    /// Begin a transaction with the session's default peer.
    fn begin_transaction(&self) -> Result<Self::Tx>;

    /// Begin a transaction directed at `endpoint`.
    fn begin_transaction_to(&self, endpoint: SocketAddr) -> Result<Self::Tx>;

    /// Release the session's socket.
    fn close(&self) -> Result<()>;

    /// Local endpoint, `None` if never bound or already closed.
    fn local_addr(&self) -> Option<SocketAddr>;
}
