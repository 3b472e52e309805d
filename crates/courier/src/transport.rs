//! Courier transport capability.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport failure reported by a courier adapter.
///
/// The core never retries at this boundary; a failed send leaves the
/// courier's queue untouched for a later flush.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportError {
    #[error("courier service unavailable: {0}")]
    Unavailable(String),

    #[error("courier rejected payload: {0}")]
    Rejected(String),

    #[error("transport io failure: {0}")]
    Io(String),
}

/// Sends a list of carrier-assigned consignment numbers in one call.
///
/// Implementations are not assumed idempotent: calling `send` again after an
/// error may notify the carrier twice. Timeout policy belongs here too.
pub trait CourierTransport: Send + Sync {
    fn send(&self, numbers: &[u64]) -> Result<(), TransportError>;

    /// Short human-readable label used in logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

impl<T> CourierTransport for Arc<T>
where
    T: CourierTransport + ?Sized,
{
    fn send(&self, numbers: &[u64]) -> Result<(), TransportError> {
        (**self).send(numbers)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T> CourierTransport for Box<T>
where
    T: CourierTransport + ?Sized,
{
    fn send(&self, numbers: &[u64]) -> Result<(), TransportError> {
        (**self).send(numbers)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
