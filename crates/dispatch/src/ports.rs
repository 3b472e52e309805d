//! Capabilities the coordinator depends on but does not implement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use consign_batch::{BatchRecord, ConsignmentDraft, ConsignmentRecord};
use consign_core::{BatchId, ConsignmentId, CourierId, ProductRef};
use consign_courier::{CourierTransport, NumberAllocator};

/// Storage failure. The coordinator propagates these without retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// Another writer holds conflicting state (e.g. a second open batch).
    #[error("repository conflict: {0}")]
    Conflict(String),

    /// The store is held by another writer and did not free up in time.
    #[error("repository locked: {0}")]
    Locked(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable batch and consignment state.
///
/// Implementations must refuse to save an `Open` batch while a different
/// batch is already open, and must never reopen a closed batch. Together with
/// [`DispatchRepository::close_batch`] and the open-batch check in
/// [`DispatchRepository::insert_consignment`] this keeps the single-open-batch
/// invariant across coordinator instances sharing one store.
pub trait DispatchRepository: Send + Sync {
    fn save_batch(&self, batch: &BatchRecord) -> Result<(), RepositoryError>;

    /// Atomically move a stored `Open` batch to `Closed`.
    ///
    /// Fails with `Conflict` if the stored batch is already closed and
    /// `NotFound` if it was never saved. Exactly one caller wins the close.
    fn close_batch(&self, id: BatchId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Store a new, unsent consignment and assign its internal id.
    ///
    /// Fails with `Conflict` unless the draft's batch is stored and open.
    fn insert_consignment(&self, draft: &ConsignmentDraft) -> Result<ConsignmentId, RepositoryError>;

    /// Overwrite an existing consignment (used to record `sent`).
    fn save_consignment(&self, consignment: &ConsignmentRecord) -> Result<(), RepositoryError>;

    /// The batch with the highest id, if any was ever saved.
    fn load_latest_batch(&self) -> Result<Option<BatchRecord>, RepositoryError>;

    fn load_batch(&self, id: BatchId) -> Result<Option<BatchRecord>, RepositoryError>;

    /// Consignments of a batch in creation order.
    fn load_consignments_for_batch(&self, id: BatchId) -> Result<Vec<ConsignmentRecord>, RepositoryError>;

    /// Highest consignment number ever stored for a courier.
    fn highest_consignment_number(&self, courier: CourierId) -> Result<Option<u64>, RepositoryError>;

    /// Closed batches that still hold unsent consignments, in id order.
    ///
    /// The default walks every batch id below the latest; stores with an
    /// index should override it.
    fn closed_batches_with_unsent(&self) -> Result<Vec<BatchId>, RepositoryError> {
        let Some(latest) = self.load_latest_batch()? else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::new();
        for raw in 1..=latest.id.value() {
            let id = BatchId::from_raw(raw);
            let Some(batch) = self.load_batch(id)? else {
                continue;
            };
            if !batch.is_open() && self.load_consignments_for_batch(id)?.iter().any(|c| !c.sent) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

impl<R> DispatchRepository for Arc<R>
where
    R: DispatchRepository + ?Sized,
{
    fn save_batch(&self, batch: &BatchRecord) -> Result<(), RepositoryError> {
        (**self).save_batch(batch)
    }

    fn close_batch(&self, id: BatchId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        (**self).close_batch(id, closed_at)
    }

    fn insert_consignment(&self, draft: &ConsignmentDraft) -> Result<ConsignmentId, RepositoryError> {
        (**self).insert_consignment(draft)
    }

    fn save_consignment(&self, consignment: &ConsignmentRecord) -> Result<(), RepositoryError> {
        (**self).save_consignment(consignment)
    }

    fn load_latest_batch(&self) -> Result<Option<BatchRecord>, RepositoryError> {
        (**self).load_latest_batch()
    }

    fn load_batch(&self, id: BatchId) -> Result<Option<BatchRecord>, RepositoryError> {
        (**self).load_batch(id)
    }

    fn load_consignments_for_batch(&self, id: BatchId) -> Result<Vec<ConsignmentRecord>, RepositoryError> {
        (**self).load_consignments_for_batch(id)
    }

    fn highest_consignment_number(&self, courier: CourierId) -> Result<Option<u64>, RepositoryError> {
        (**self).highest_consignment_number(courier)
    }

    fn closed_batches_with_unsent(&self) -> Result<Vec<BatchId>, RepositoryError> {
        (**self).closed_batches_with_unsent()
    }
}

/// Chooses the courier for a set of products.
///
/// Must be pure: the same products always map to the same courier.
pub trait CourierSelector: Send + Sync {
    fn select_courier(&self, products: &[ProductRef]) -> CourierId;
}

impl<F> CourierSelector for F
where
    F: Fn(&[ProductRef]) -> CourierId + Send + Sync,
{
    fn select_courier(&self, products: &[ProductRef]) -> CourierId {
        self(products)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CarrierError {
    #[error("courier {0} is not configured")]
    NotConfigured(CourierId),

    #[error("courier {courier} configuration is invalid: {reason}")]
    Invalid { courier: CourierId, reason: String },
}

/// Builds the transport and number allocator for a courier from carrier configuration.
pub trait CarrierDirectory: Send + Sync {
    fn resolve_transport(&self, courier: CourierId) -> Result<Box<dyn CourierTransport>, CarrierError>;

    /// `highest_issued` is the highest number already stored for this courier;
    /// the allocator must continue above it.
    fn resolve_allocator(
        &self,
        courier: CourierId,
        highest_issued: Option<u64>,
    ) -> Result<Box<dyn NumberAllocator>, CarrierError>;
}

impl<D> CarrierDirectory for Arc<D>
where
    D: CarrierDirectory + ?Sized,
{
    fn resolve_transport(&self, courier: CourierId) -> Result<Box<dyn CourierTransport>, CarrierError> {
        (**self).resolve_transport(courier)
    }

    fn resolve_allocator(
        &self,
        courier: CourierId,
        highest_issued: Option<u64>,
    ) -> Result<Box<dyn NumberAllocator>, CarrierError> {
        (**self).resolve_allocator(courier, highest_issued)
    }
}
