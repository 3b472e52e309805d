use thiserror::Error;

use consign_core::{BatchId, CourierId, DomainError};
use consign_courier::CourierError;

pub type BatchResult<T> = Result<T, BatchError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch {0} is not open")]
    NotOpen(BatchId),

    /// A consignment references a courier that has not been built yet.
    #[error("courier {0} is not registered")]
    CourierMissing(CourierId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Courier(#[from] CourierError),
}
