//! Session factory.

use std::net::SocketAddr;
use std::time::Duration;

use super::AnySession;
use crate::config::Config;
use crate::error::{NetError, Result};
use crate::transport::{
    FragmentationPolicy, TcpClientSession, TcpServerSession, TransportKind, UdpSession,
    DEFAULT_BACKLOG, MAX_UDP_PAYLOAD,
};

/// Builds a fresh session of the requested kind.
///
/// The endpoint is the local bind address for every kind. The factory never
/// caches: each call constructs a new session.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    backlog: i32,
    connect_timeout: Option<Duration>,
    max_length: usize,
    policy: FragmentationPolicy,
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            connect_timeout: None,
            max_length: MAX_UDP_PAYLOAD,
            policy: FragmentationPolicy::default(),
        }
    }
}

impl SessionFactory {
    /// Create a factory with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory applying the backlog, connect timeout and UDP
    /// fragmentation settings of `config`.
    pub fn with_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backlog: config.session.backlog,
            connect_timeout: config.session.connect_timeout(),
            max_length: config.udp.max_length,
            policy: config.udp.policy,
        })
    }

    /// Create a session of `kind` bound to `endpoint`.
    pub fn create_session(&self, endpoint: SocketAddr, kind: TransportKind) -> Result<AnySession> {
        let session = match kind {
            TransportKind::Udp => UdpSession::bind(endpoint)?
                .with_fragmentation(self.max_length, self.policy)?
                .into(),
            TransportKind::TcpServer => {
                TcpServerSession::bind_with_backlog(endpoint, self.backlog)?.into()
            }
            TransportKind::TcpClient => TcpClientSession::bind(endpoint)?
                .with_connect_timeout(self.connect_timeout)
                .into(),
            TransportKind::Multi => {
                return Err(NetError::Config(
                    "the session factory builds udp, tcp-server and tcp-client sessions only"
                        .to_string(),
                ))
            }
        };
        tracing::debug!(%kind, %endpoint, "Session created");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Session, Transaction};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_creates_matching_kind() {
        let factory = SessionFactory::new();
        for kind in [
            TransportKind::Udp,
            TransportKind::TcpServer,
            TransportKind::TcpClient,
        ] {
            let session = factory.create_session(loopback(), kind).unwrap();
            assert_eq!(session.kind(), kind);
            assert!(session.local_addr().is_some());
            session.close().unwrap();
        }
    }

    #[test]
    fn test_multi_is_config_error() {
        let err = SessionFactory::new()
            .create_session(loopback(), TransportKind::Multi)
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
    }

    #[test]
    fn test_always_fresh() {
        let factory = SessionFactory::new();
        let a = factory.create_session(loopback(), TransportKind::Udp).unwrap();
        let b = factory.create_session(loopback(), TransportKind::Udp).unwrap();
        assert_ne!(a.local_addr(), b.local_addr());
    }

    #[test]
    fn test_config_applies_to_udp_transactions() {
        let mut config = Config::default();
        config.udp.max_length = 512;
        config.udp.policy = FragmentationPolicy::Reject;

        let factory = SessionFactory::with_config(&config).unwrap();
        let session = factory.create_session(loopback(), TransportKind::Udp).unwrap();
        let tx = session.begin_transaction().unwrap();
        let udp = tx.as_udp().unwrap();
        assert_eq!(udp.max_length(), 512);
        assert_eq!(udp.policy(), FragmentationPolicy::Reject);
        assert!(tx.has_next());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.udp.max_length = 70_000;
        assert!(SessionFactory::with_config(&config).is_err());
    }
}
