//! Session construction and the closed set of session/transaction variants.
//!
//! [`AnySession`] and [`AnyTransaction`] let callers hold any transport behind
//! one type and dispatch by pattern matching; [`SessionFactory`] builds the
//! right variant for a [`TransportKind`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use mpnet::{Session, SessionFactory, Transaction, TransportKind};
//!
//! let factory = SessionFactory::new();
//! let session = factory.create_session("127.0.0.1:0".parse().unwrap(), TransportKind::Udp)?;
//! let tx = session.begin_transaction_to("127.0.0.1:9000".parse().unwrap())?;
//! tx.send(b"hello")?;
//! # Ok::<(), mpnet::NetError>(())
//! ```

mod factory;

pub use factory::SessionFactory;

use std::net::SocketAddr;

use crate::error::Result;
use crate::transport::{
    Session, SocketInfo, TcpClientSession, TcpServerSession, TcpTransaction, Transaction,
    TransportKind, UdpSession, UdpTransaction,
};

/// Any concrete session.
#[derive(Debug)]
pub enum AnySession {
    /// UDP session
    Udp(UdpSession),
    /// TCP server session
    TcpServer(TcpServerSession),
    /// TCP client session
    TcpClient(TcpClientSession),
}

impl AnySession {
    /// The UDP session, if this is one.
    pub fn as_udp(&self) -> Option<&UdpSession> {
        match self {
            Self::Udp(session) => Some(session),
            _ => None,
        }
    }

    /// The TCP server session, if this is one.
    pub fn as_tcp_server(&self) -> Option<&TcpServerSession> {
        match self {
            Self::TcpServer(session) => Some(session),
            _ => None,
        }
    }

    /// The TCP client session, if this is one.
    pub fn as_tcp_client(&self) -> Option<&TcpClientSession> {
        match self {
            Self::TcpClient(session) => Some(session),
            _ => None,
        }
    }
}

impl From<UdpSession> for AnySession {
    fn from(session: UdpSession) -> Self {
        Self::Udp(session)
    }
}

impl From<TcpServerSession> for AnySession {
    fn from(session: TcpServerSession) -> Self {
        Self::TcpServer(session)
    }
}

impl From<TcpClientSession> for AnySession {
    fn from(session: TcpClientSession) -> Self {
        Self::TcpClient(session)
    }
}

impl Session for AnySession {
    type Tx = AnyTransaction;

    fn kind(&self) -> TransportKind {
        match self {
            Self::Udp(s) => s.kind(),
            Self::TcpServer(s) => s.kind(),
            Self::TcpClient(s) => s.kind(),
        }
    }

    fn begin_transaction(&self) -> Result<AnyTransaction> {
        match self {
            Self::Udp(s) => s.begin_transaction().map(AnyTransaction::Udp),
            Self::TcpServer(s) => s.begin_transaction().map(AnyTransaction::Tcp),
            Self::TcpClient(s) => s.begin_transaction().map(AnyTransaction::Tcp),
        }
    }

    fn begin_transaction_to(&self, endpoint: SocketAddr) -> Result<AnyTransaction> {
        match self {
            Self::Udp(s) => s.begin_transaction_to(endpoint).map(AnyTransaction::Udp),
            Self::TcpServer(s) => s.begin_transaction_to(endpoint).map(AnyTransaction::Tcp),
            Self::TcpClient(s) => s.begin_transaction_to(endpoint).map(AnyTransaction::Tcp),
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            Self::Udp(s) => s.close(),
            Self::TcpServer(s) => s.close(),
            Self::TcpClient(s) => s.close(),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Udp(s) => s.local_addr(),
            Self::TcpServer(s) => s.local_addr(),
            Self::TcpClient(s) => s.local_addr(),
        }
    }
}

/// Any concrete transaction.
#[derive(Debug)]
pub enum AnyTransaction {
    /// UDP transaction
    Udp(UdpTransaction),
    /// TCP transaction (server or client role)
    Tcp(TcpTransaction),
}

impl AnyTransaction {
    /// The UDP transaction, for fragmentation settings.
    pub fn as_udp(&self) -> Option<&UdpTransaction> {
        match self {
            Self::Udp(tx) => Some(tx),
            Self::Tcp(_) => None,
        }
    }

    /// The TCP transaction, if this is one.
    pub fn as_tcp(&self) -> Option<&TcpTransaction> {
        match self {
            Self::Tcp(tx) => Some(tx),
            Self::Udp(_) => None,
        }
    }

    fn inner(&self) -> &dyn Transaction {
        match self {
            Self::Udp(tx) => tx,
            Self::Tcp(tx) => tx,
        }
    }
}

impl Transaction for AnyTransaction {
    fn kind(&self) -> TransportKind {
        self.inner().kind()
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.inner().peer()
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        self.inner().send(data)
    }

    fn send_to(&self, endpoint: Option<SocketAddr>, data: &[u8]) -> Result<()> {
        self.inner().send_to(endpoint, data)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketInfo)> {
        self.inner().receive(buf)
    }

    fn has_next(&self) -> bool {
        self.inner().has_next()
    }

    fn allocate_receive_buffer(&self) -> Result<Vec<u8>> {
        self.inner().allocate_receive_buffer()
    }

    fn close(&self) -> Result<()> {
        self.inner().close()
    }
}
