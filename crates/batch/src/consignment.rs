use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use consign_core::{BatchId, ConsignmentId, CourierId, ProductRef};
use consign_courier::{Courier, QueuedConsignment};

use crate::error::BatchResult;

/// A consignment that has its courier and number but no internal id yet.
///
/// Building a draft allocates the consignment number from the courier right
/// away, so the number is stable before anything is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsignmentDraft {
    batch_id: BatchId,
    products: Vec<ProductRef>,
    courier_id: CourierId,
    number: u64,
    created_at: DateTime<Utc>,
}

impl ConsignmentDraft {
    pub fn new(
        batch_id: BatchId,
        products: Vec<ProductRef>,
        courier: &mut Courier,
        created_at: DateTime<Utc>,
    ) -> BatchResult<Self> {
        ProductRef::validate_all(&products)?;
        let number = courier.allocate_next_number()?;
        Ok(Self {
            batch_id,
            products,
            courier_id: courier.courier_id(),
            number,
            created_at,
        })
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn products(&self) -> &[ProductRef] {
        &self.products
    }

    pub fn courier_id(&self) -> CourierId {
        self.courier_id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Persisted form of a consignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentRecord {
    pub id: ConsignmentId,
    pub batch_id: BatchId,
    pub products: Vec<ProductRef>,
    pub courier_id: CourierId,
    pub consignment_number: u64,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

/// One shipment unit bound to one courier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consignment {
    id: ConsignmentId,
    batch_id: BatchId,
    products: Vec<ProductRef>,
    courier_id: CourierId,
    number: u64,
    sent: bool,
    // Transient: set once this process has pushed the number onto a courier queue.
    queued: bool,
    created_at: DateTime<Utc>,
}

impl Consignment {
    /// Finish a draft with the internal id the repository assigned.
    pub fn create(draft: ConsignmentDraft, id: ConsignmentId) -> Self {
        Self {
            id,
            batch_id: draft.batch_id,
            products: draft.products,
            courier_id: draft.courier_id,
            number: draft.number,
            sent: false,
            queued: false,
            created_at: draft.created_at,
        }
    }

    /// Rebuild from persisted state. Queued state is never persisted.
    pub fn restore(record: ConsignmentRecord) -> BatchResult<Self> {
        ProductRef::validate_all(&record.products)?;
        Ok(Self {
            id: record.id,
            batch_id: record.batch_id,
            products: record.products,
            courier_id: record.courier_id,
            number: record.consignment_number,
            sent: record.sent,
            queued: false,
            created_at: record.created_at,
        })
    }

    pub fn record(&self) -> ConsignmentRecord {
        ConsignmentRecord {
            id: self.id,
            batch_id: self.batch_id,
            products: self.products.clone(),
            courier_id: self.courier_id,
            consignment_number: self.number,
            sent: self.sent,
            created_at: self.created_at,
        }
    }

    pub fn internal_id(&self) -> ConsignmentId {
        self.id
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn products(&self) -> &[ProductRef] {
        &self.products
    }

    pub fn courier_id(&self) -> CourierId {
        self.courier_id
    }

    pub fn consignment_number(&self) -> u64 {
        self.number
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn queue_entry(&self) -> QueuedConsignment {
        QueuedConsignment {
            consignment_id: self.id,
            batch_id: self.batch_id,
            number: self.number,
        }
    }

    pub(crate) fn mark_queued(&mut self) {
        self.queued = true;
    }

    /// Returns `true` only on the false → true transition.
    pub(crate) fn mark_sent(&mut self) -> bool {
        if self.sent {
            return false;
        }
        self.sent = true;
        true
    }
}
