//! Adaptive multi-transport session.
//!
//! A [`MultiSession`] owns up to one UDP, one TCP server and one TCP client
//! session and routes each transaction to whichever kind its
//! [`TransferPolicySelector`] last chose.
//!
//! ```text
//!   update(signals) ──> selector ──> current kind
//!                                        │
//!   begin_transaction ───────────────────┤
//!                                        v
//!               ┌──────────┬─────────────┬─────────────┐
//!               │   UDP    │ TCP server  │ TCP client  │   (built on first use,
//!               └──────────┴─────────────┴─────────────┘    reused afterwards)
//! ```
//!
//! Switching kinds never closes a session; [`close`](Session::close) closes
//! every session ever built and reports each failure.

mod selector;

pub use selector::{SelectByDataAmount, Signal, TransferPolicySelector};

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, DEFAULT_PORT};
use crate::error::{NetError, Result};
use crate::session::{AnySession, AnyTransaction, SessionFactory};
use crate::transport::{Session, TransportKind};

/// Order in which sessions are reported and closed.
const KINDS: [TransportKind; 3] = [
    TransportKind::Udp,
    TransportKind::TcpClient,
    TransportKind::TcpServer,
];

#[derive(Default)]
struct Slots {
    sessions: HashMap<TransportKind, Arc<AnySession>>,
    closed: bool,
}

/// Adaptive session routing to a selector-chosen transport.
pub struct MultiSession {
    selector: Box<dyn TransferPolicySelector>,
    factory: SessionFactory,
    bind_ip: IpAddr,
    port: AtomicU16,
    current: Mutex<TransportKind>,
    slots: Mutex<Slots>,
}

impl fmt::Debug for MultiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSession")
            .field("bind_ip", &self.bind_ip)
            .field("port", &self.port())
            .field("current", &self.current_kind())
            .field("constructed", &self.constructed_kinds())
            .finish_non_exhaustive()
    }
}

impl MultiSession {
    /// Create an adaptive session on `0.0.0.0:9000`, starting on UDP.
    pub fn new(selector: impl TransferPolicySelector + 'static) -> Self {
        Self {
            selector: Box::new(selector),
            factory: SessionFactory::new(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: AtomicU16::new(DEFAULT_PORT),
            current: Mutex::new(TransportKind::Udp),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Create an adaptive session from configuration.
    pub fn from_config(
        config: &Config,
        selector: impl TransferPolicySelector + 'static,
    ) -> Result<Self> {
        let factory = SessionFactory::with_config(config)?;
        let bind_ip = config.session.bind_ip()?;
        Ok(Self {
            factory,
            bind_ip,
            port: AtomicU16::new(config.session.port),
            ..Self::new(selector)
        })
    }

    /// Set the IP sessions are bound to.
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Port new sessions bind to.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    /// Change the port; applies to sessions built after the call.
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Release);
    }

    /// Kind the next transaction is routed to.
    pub fn current_kind(&self) -> TransportKind {
        *self.current.lock()
    }

    /// Kinds whose session has been built, in close order.
    pub fn constructed_kinds(&self) -> Vec<TransportKind> {
        let slots = self.slots.lock();
        KINDS
            .into_iter()
            .filter(|kind| slots.sessions.contains_key(kind))
            .collect()
    }

    /// Re-evaluate the current kind from situational signals.
    ///
    /// Already built sessions stay open; only routing changes.
    pub fn update(&self, signals: &[Signal]) -> Result<TransportKind> {
        let kind = self.selector.select(signals)?;
        if !kind.is_concrete() {
            return Err(NetError::Config(format!(
                "selector returned {kind}, expected udp, tcp-server or tcp-client"
            )));
        }
        let previous = std::mem::replace(&mut *self.current.lock(), kind);
        if previous != kind {
            tracing::debug!(from = %previous, to = %kind, "Transfer policy changed");
        }
        Ok(kind)
    }

    /// Session of the current kind, built on first use.
    pub fn current_session(&self) -> Result<Arc<AnySession>> {
        self.session(self.current_kind())
    }

    fn session(&self, kind: TransportKind) -> Result<Arc<AnySession>> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(NetError::State("the multi session is closed".to_string()));
        }
        if let Some(session) = slots.sessions.get(&kind) {
            return Ok(Arc::clone(session));
        }
        let endpoint = SocketAddr::new(self.bind_ip, self.port());
        let session = Arc::new(self.factory.create_session(endpoint, kind)?);
        slots.sessions.insert(kind, Arc::clone(&session));
        Ok(session)
    }
}

impl Session for MultiSession {
    type Tx = AnyTransaction;

    fn kind(&self) -> TransportKind {
        TransportKind::Multi
    }

    fn begin_transaction(&self) -> Result<AnyTransaction> {
        self.current_session()?.begin_transaction()
    }

    fn begin_transaction_to(&self, endpoint: SocketAddr) -> Result<AnyTransaction> {
        self.current_session()?.begin_transaction_to(endpoint)
    }

    fn close(&self) -> Result<()> {
        let sessions = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            std::mem::take(&mut slots.sessions)
        };

        close_all(
            KINDS
                .into_iter()
                .filter_map(|kind| sessions.get(&kind).map(|session| (kind, session.close()))),
        )
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        let kind = self.current_kind();
        let session = self.slots.lock().sessions.get(&kind).cloned();
        session.and_then(|s| s.local_addr())
    }
}

/// Drain every close outcome, then report the failures together.
fn close_all(outcomes: impl IntoIterator<Item = (TransportKind, Result<()>)>) -> Result<()> {
    let mut failures = Vec::new();
    for (kind, outcome) in outcomes {
        if let Err(e) = outcome {
            tracing::warn!(%kind, "Failed to close session: {}", e);
            failures.push((kind, e));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(NetError::CloseAll(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transaction;

    fn flag_selector(signals: &[Signal]) -> Result<TransportKind> {
        Ok(match signals.first() {
            Some(Signal::Flag(true)) => TransportKind::TcpClient,
            Some(Signal::Text(t)) if t == "multi" => TransportKind::Multi,
            _ => TransportKind::Udp,
        })
    }

    fn loopback(selector: impl TransferPolicySelector + 'static) -> MultiSession {
        let session = MultiSession::new(selector).with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        session.set_port(0);
        session
    }

    #[test]
    fn test_defaults() {
        let session = MultiSession::new(SelectByDataAmount::new(false));
        assert_eq!(session.port(), 9000);
        assert_eq!(session.current_kind(), TransportKind::Udp);
        assert_eq!(session.kind(), TransportKind::Multi);
        assert!(session.constructed_kinds().is_empty());
        assert!(session.local_addr().is_none());
    }

    #[test]
    fn test_lazy_construction_and_reuse() {
        let session = loopback(flag_selector);
        let first = session.current_session().unwrap();
        let tx = session.begin_transaction().unwrap();
        assert_eq!(tx.kind(), TransportKind::Udp);
        let second = session.current_session().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(session.constructed_kinds(), vec![TransportKind::Udp]);
        assert_eq!(session.local_addr(), first.local_addr());
    }

    #[test]
    fn test_update_switches_without_closing() {
        let session = loopback(flag_selector);
        let udp = session.current_session().unwrap();

        assert_eq!(
            session.update(&[Signal::from(true)]).unwrap(),
            TransportKind::TcpClient
        );
        assert!(session.local_addr().is_none());
        let client = session.current_session().unwrap();
        assert_eq!(client.kind(), TransportKind::TcpClient);
        assert!(session.begin_transaction().unwrap_err().is_state());

        session.update(&[Signal::from(false)]).unwrap();
        assert!(Arc::ptr_eq(&udp, &session.current_session().unwrap()));
        assert!(udp.local_addr().is_some());
        assert_eq!(
            session.constructed_kinds(),
            vec![TransportKind::Udp, TransportKind::TcpClient]
        );
    }

    #[test]
    fn test_selector_returning_multi_rejected() {
        let session = loopback(flag_selector);
        let err = session.update(&[Signal::from("multi")]).unwrap_err();
        assert!(matches!(err, NetError::Config(_)));
        assert_eq!(session.current_kind(), TransportKind::Udp);
    }

    #[test]
    fn test_selector_error_keeps_kind() {
        let session = loopback(SelectByDataAmount::new(true));
        session.update(&[Signal::from(10)]).unwrap();
        assert!(session.update(&[Signal::from("x")]).is_err());
        assert_eq!(session.current_kind(), TransportKind::Udp);

        session.update(&[Signal::from(1)]).unwrap();
        assert_eq!(session.current_kind(), TransportKind::TcpServer);
    }

    #[test]
    fn test_close_closes_every_session() {
        let session = loopback(flag_selector);
        let udp = session.current_session().unwrap();
        session.update(&[Signal::from(true)]).unwrap();
        let client = session.current_session().unwrap();

        session.close().unwrap();
        assert!(udp.local_addr().is_none());
        assert!(client.local_addr().is_none());
        assert!(session.constructed_kinds().is_empty());
        assert!(session.begin_transaction().unwrap_err().is_state());

        session.close().unwrap();
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.session.host = "127.0.0.1".to_string();
        config.session.port = 0;
        config.udp.max_length = 256;

        let session = MultiSession::from_config(&config, flag_selector).unwrap();
        assert_eq!(session.port(), 0);
        let tx = session.begin_transaction().unwrap();
        assert_eq!(tx.as_udp().unwrap().max_length(), 256);
        assert!(session
            .local_addr()
            .is_some_and(|addr| addr.ip() == IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_close_all_attempts_every_session() {
        let mut attempted = Vec::new();
        let failure = |context: &str| {
            NetError::close(
                context,
                std::io::Error::new(std::io::ErrorKind::Other, "shutdown failed"),
            )
        };
        let outcomes = [
            (TransportKind::Udp, Err(failure("UDP session"))),
            (TransportKind::TcpClient, Ok(())),
            (TransportKind::TcpServer, Err(failure("TCP server session"))),
        ];

        let err = close_all(outcomes.into_iter().inspect(|(kind, _)| attempted.push(*kind)))
            .unwrap_err();
        assert_eq!(attempted, KINDS.to_vec());
        match err {
            NetError::CloseAll(failures) => {
                let kinds: Vec<_> = failures.iter().map(|(kind, _)| *kind).collect();
                assert_eq!(kinds, vec![TransportKind::Udp, TransportKind::TcpServer]);
                assert!(failures.iter().all(|(_, e)| e.category() == crate::error::ErrorCategory::Close));
            }
            other => panic!("expected CloseAll, got {:?}", other),
        }
    }

    #[test]
    fn test_close_all_succeeds_without_failures() {
        let outcomes = KINDS.map(|kind| (kind, Ok(())));
        assert!(close_all(outcomes).is_ok());
        assert!(close_all(std::iter::empty()).is_ok());
    }
}
