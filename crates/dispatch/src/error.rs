//! Coordinator error model.

use thiserror::Error;

use consign_batch::BatchError;
use consign_core::DomainError;
use consign_courier::CourierError;

use crate::ports::{CarrierError, RepositoryError};

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced by coordinator operations.
///
/// `BatchNotOpen` and `Validation` abort the operation before anything is
/// changed. Transport failures never appear here; they are reported per
/// courier in [`crate::CloseReport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no open batch")]
    BatchNotOpen,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Domain(DomainError),

    #[error(transparent)]
    Courier(#[from] CourierError),

    #[error(transparent)]
    Carrier(#[from] CarrierError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidProduct(msg) => DispatchError::Validation(msg),
            other => DispatchError::Domain(other),
        }
    }
}

impl From<BatchError> for DispatchError {
    fn from(value: BatchError) -> Self {
        match value {
            BatchError::NotOpen(_) => DispatchError::BatchNotOpen,
            BatchError::Domain(e) => e.into(),
            BatchError::Courier(e) => DispatchError::Courier(e),
            BatchError::CourierMissing(id) => DispatchError::Domain(DomainError::CourierNotRegistered(id)),
        }
    }
}
