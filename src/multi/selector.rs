//! Transfer policy selection.
//!
//! A selector maps situational signals to the transport a [`MultiSession`]
//! routes its next transactions to. Selectors are pure: the same signals
//! always produce the same kind.
//!
//! [`MultiSession`]: super::MultiSession

use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};
use crate::transport::TransportKind;

/// One situational argument passed to a selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    /// Numeric argument, e.g. an expected message size
    Number(f64),
    /// Boolean argument
    Flag(bool),
    /// Free-form argument
    Text(String),
}

impl Signal {
    /// The numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

macro_rules! impl_numeric_signal {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Signal {
                fn from(value: $ty) -> Self {
                    Self::Number(value as f64)
                }
            }
        )*
    };
}

impl_numeric_signal!(f64, f32, u8, u16, u32, u64, usize, i32, i64);

impl From<bool> for Signal {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for Signal {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Signal {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Strategy choosing a transport kind from situational signals.
pub trait TransferPolicySelector: Send + Sync {
    /// Select the transport for the given signals.
    ///
    /// Malformed signals are a [`NetError::Config`] error.
    fn select(&self, signals: &[Signal]) -> Result<TransportKind>;
}

impl<F> TransferPolicySelector for F
where
    F: Fn(&[Signal]) -> Result<TransportKind> + Send + Sync,
{
    fn select(&self, signals: &[Signal]) -> Result<TransportKind> {
        self(signals)
    }
}

/// UDP cost curve, coefficients of x^7 down to x^0.
const UDP_COST: [f64; 8] = [
    -0.0007, 0.0123, -0.1369, 0.9768, -4.3198, 11.0950, -14.5011, 7.8728,
];

/// TCP cost curve, coefficients of x^7 down to x^1.
const TCP_COST: [f64; 7] = [0.0004, -0.0043, 0.0268, -0.1029, 0.2302, -0.2652, 0.1166];

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Selects by the data amount carried in the first signal.
///
/// Compares two fitted cost curves at the data amount and picks UDP when its
/// estimated cost is strictly lower, otherwise TCP in the configured role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectByDataAmount {
    is_server: bool,
}

impl SelectByDataAmount {
    /// Create a selector; `is_server` picks the TCP role it falls back to.
    pub fn new(is_server: bool) -> Self {
        Self { is_server }
    }

    /// Estimated UDP cost at data amount `x`.
    pub fn udp_cost(x: f64) -> f64 {
        horner(&UDP_COST, x)
    }

    /// Estimated TCP cost at data amount `x`.
    pub fn tcp_cost(x: f64) -> f64 {
        horner(&TCP_COST, x) * x
    }

    fn tcp_kind(&self) -> TransportKind {
        if self.is_server {
            TransportKind::TcpServer
        } else {
            TransportKind::TcpClient
        }
    }
}

impl TransferPolicySelector for SelectByDataAmount {
    fn select(&self, signals: &[Signal]) -> Result<TransportKind> {
        let x = signals
            .first()
            .and_then(Signal::as_number)
            .filter(|x| !x.is_nan())
            .ok_or_else(|| {
                NetError::Config("the situation argument is not a number".to_string())
            })?;

        let kind = if Self::udp_cost(x) < Self::tcp_cost(x) {
            TransportKind::Udp
        } else {
            self.tcp_kind()
        };
        tracing::trace!(x, %kind, "Selected transport by data amount");
        Ok(kind)
    }
}
