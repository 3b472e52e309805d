//! Domain error model.

use thiserror::Error;

use crate::id::{BatchId, ConsignmentId, CourierId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic dispatch-rule failures.
///
/// Transport and storage failures have their own types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Product input a consignment cannot be built from.
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown courier '{0}'")]
    UnknownCourier(String),

    /// Only one batch may be open at a time.
    #[error("batch {0} is still open")]
    BatchStillOpen(BatchId),

    #[error("batch {0} does not exist")]
    BatchNotFound(BatchId),

    /// The operation is not allowed on the batch the coordinator holds open.
    #[error("batch {0} is the current batch")]
    CurrentBatch(BatchId),

    #[error("consignment {consignment} belongs to batch {actual}, not {expected}")]
    ForeignConsignment {
        consignment: ConsignmentId,
        actual: BatchId,
        expected: BatchId,
    },

    /// A consignment was queued for a courier with no registry entry.
    #[error("courier {0} is not registered")]
    CourierNotRegistered(CourierId),

    #[error("{0} id space exhausted")]
    IdSpaceExhausted(&'static str),
}

impl DomainError {
    pub fn invalid_product(msg: impl Into<String>) -> Self {
        Self::InvalidProduct(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
