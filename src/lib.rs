//! # MPNet - Transport-Agnostic Messaging
//!
//! Exchange discrete byte messages over UDP or TCP through one session /
//! transaction contract, and optionally switch transports at runtime based on
//! a pluggable selection strategy.
//!
//! ## Features
//!
//! - **Uniform contract**: UDP, TCP server and TCP client behind [`Session`] and [`Transaction`]
//! - **UDP fragmentation**: reject or subdivide payloads above the datagram limit
//! - **Adaptive routing**: [`MultiSession`] delegates to the transport a selector picks
//! - **Typed errors**: every socket failure maps to one [`ErrorCategory`]
//!
//! ## Architecture
//!
//! ```text
//!   SessionFactory ──creates──> AnySession ──begin_transaction──> AnyTransaction
//!                               │  Udp                             │  Udp (fragmenting)
//!                               │  TcpServer (accept)              │  Tcp (stream lease)
//!                               │  TcpClient (connect)             │
//!                                                                  │
//!   MultiSession ──selector──> current kind ──> lazily built AnySession per kind
//! ```
//!
//! ### Lifecycle
//!
//! ```text
//!   [Unbound] ── bind/listen/connect ──> [Ready] ── close() ──> [Closed]
//!                                          │
//!                     begin_transaction ───┴──> Transaction ── close() ──> released
//! ```
//!
//! Closing a transaction releases its transport-specific I/O state. A UDP
//! transaction only forgets its default peer; the owning session closes the
//! socket. Closing a session invalidates every transaction it minted.
//!
//! ## Concurrency
//!
//! All operations are blocking calls on the caller's thread. Accept and
//! receive block indefinitely; connect accepts an optional timeout. A blocked
//! call is cancelled only by closing its session or transaction from another
//! thread, which is best effort for TCP streams: bytes of a partial read may
//! already have been consumed.
//!
//! ## Quick Start
//!
//! ### UDP
//!
//! ```rust,no_run
//! use mpnet::{Session, Transaction, UdpSession};
//!
//! let receiver = UdpSession::bind("127.0.0.1:9000".parse().unwrap())?;
//! let sender = UdpSession::bind("127.0.0.1:0".parse().unwrap())?;
//!
//! let tx = sender.begin_transaction_to("127.0.0.1:9000".parse().unwrap())?;
//! tx.send(b"hello")?;
//!
//! let rx = receiver.begin_transaction()?;
//! let mut buf = rx.allocate_receive_buffer()?;
//! let (n, info) = rx.receive(&mut buf)?;
//! println!("{} bytes from {:?}", n, info.source);
//! # Ok::<(), mpnet::NetError>(())
//! ```
//!
//! ### Adaptive
//!
//! ```rust,no_run
//! use mpnet::{MultiSession, SelectByDataAmount, Session, Signal, Transaction};
//!
//! let session = MultiSession::new(SelectByDataAmount::new(false));
//! session.set_port(9001);
//! session.update(&[Signal::from(2)])?;
//!
//! let tx = session.begin_transaction_to("127.0.0.1:9000".parse().unwrap())?;
//! tx.send(&[0u8; 2])?;
//! session.close()?;
//! # Ok::<(), mpnet::NetError>(())
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: Session/transaction contract and the UDP and TCP variants
//! - [`session`]: Closed variant set and the session factory
//! - [`multi`]: Adaptive session and transfer policy selectors
//! - [`address`]: Endpoint equality
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod address;
pub mod config;
pub mod error;
pub mod multi;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use address::{endpoints_equal, same_endpoint};
pub use config::Config;
pub use error::{ErrorCategory, NetError, Result};
pub use multi::{MultiSession, SelectByDataAmount, Signal, TransferPolicySelector};
pub use session::{AnySession, AnyTransaction, SessionFactory};
pub use transport::{
    FragmentationPolicy, Session, SocketInfo, TcpClientSession, TcpServerSession, TcpTransaction,
    Transaction, TransportKind, UdpSession, UdpTransaction, MAX_UDP_PAYLOAD,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
