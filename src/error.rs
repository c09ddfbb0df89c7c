//! MPNet error types.
//!
//! # Error Classification
//!
//! Every failure surfaced by a session or transaction maps to exactly one
//! [`ErrorCategory`]:
//!
//! - **Configuration**: invalid construction arguments (fragment length,
//!   unsupported transport kind, malformed situational signals)
//! - **Bind / Connect**: the platform socket primitive failed while binding or
//!   connecting; the attempted endpoint is recorded
//! - **State**: the operation is invalid for the current session or
//!   transaction state
//! - **Transmission**: a send/receive primitive failed, or a payload exceeded
//!   the permitted datagram length under the reject policy
//! - **Close**: releasing a resource failed
//!
//! Variants that wrap an I/O failure preserve it via `#[source]`, so the full
//! chain is available to callers.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::transport::TransportKind;

/// MPNet errors.
#[derive(Error, Debug)]
pub enum NetError {
    /// Invalid construction or configuration argument.
    #[error("Config error: {0}")]
    Config(String),

    /// Binding a socket to a local endpoint failed.
    #[error("Unable to bind {endpoint}: {source}")]
    Bind {
        /// Endpoint the socket was being bound to.
        endpoint: SocketAddr,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// Connecting to a remote endpoint failed.
    #[error("Unable to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint the socket was connecting to.
        endpoint: SocketAddr,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// Operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    State(String),

    /// Payload rejected because it exceeds the permitted datagram length.
    #[error("The size of buffer to send ({length}) is larger than the maximum length ({max_length})")]
    PayloadTooLarge {
        /// Requested payload length in bytes.
        length: usize,
        /// Permitted maximum length in bytes.
        max_length: usize,
    },

    /// A send or receive primitive failed.
    #[error("Transmission error ({context}): {source}")]
    Transmission {
        /// What was being attempted.
        context: String,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// Releasing a socket failed.
    #[error("Failed to close {context}: {source}")]
    Close {
        /// What was being closed.
        context: String,
        /// Underlying socket failure.
        #[source]
        source: io::Error,
    },

    /// One or more sessions of a multi-transport session failed to close.
    ///
    /// Every session is attempted; each failure is reported with the
    /// transport kind it belongs to.
    #[error("{}", CloseFailures(.0))]
    CloseAll(Vec<(TransportKind, NetError)>),
}

/// Coarse classification of a [`NetError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid construction arguments.
    Configuration,
    /// Bind primitive failed.
    Bind,
    /// Connect primitive failed.
    Connect,
    /// Operation invalid for current state.
    State,
    /// Send/receive failed or payload oversize.
    Transmission,
    /// Resource release failed.
    Close,
}

impl NetError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NetError::Config(_) => ErrorCategory::Configuration,
            NetError::Bind { .. } => ErrorCategory::Bind,
            NetError::Connect { .. } => ErrorCategory::Connect,
            NetError::State(_) => ErrorCategory::State,
            NetError::PayloadTooLarge { .. } | NetError::Transmission { .. } => {
                ErrorCategory::Transmission
            }
            NetError::Close { .. } | NetError::CloseAll(_) => ErrorCategory::Close,
        }
    }

    /// Check if this error is a state error.
    pub fn is_state(&self) -> bool {
        self.category() == ErrorCategory::State
    }

    pub(crate) fn transmission(context: impl Into<String>, source: io::Error) -> Self {
        NetError::Transmission {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn close(context: impl Into<String>, source: io::Error) -> Self {
        NetError::Close {
            context: context.into(),
            source,
        }
    }
}

struct CloseFailures<'a>(&'a [(TransportKind, NetError)]);

impl fmt::Display for CloseFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to close {} session(s)", self.0.len())?;
        for (i, (kind, err)) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{kind}: {err}")?;
        }
        Ok(())
    }
}

/// Result type alias for MPNet operations
pub type Result<T> = std::result::Result<T, NetError>;

impl From<toml::de::Error> for NetError {
    fn from(err: toml::de::Error) -> Self {
        NetError::Config(err.to_string())
    }
}
