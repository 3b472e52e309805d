use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use consign_core::{BatchId, ConsignmentId, CourierId, DomainError};
use consign_courier::CourierRegistry;

use crate::consignment::Consignment;
use crate::error::{BatchError, BatchResult};

/// Batch status lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Open,
    Closed,
}

/// Persisted batch header (consignments are stored separately).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: BatchId,
    pub status: BatchStatus,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl BatchRecord {
    /// What "latest batch" means before anything has been dispatched.
    pub fn sentinel() -> Self {
        Self {
            id: BatchId::SENTINEL,
            status: BatchStatus::Closed,
            opened_at: None,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == BatchStatus::Open
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == BatchId::SENTINEL
    }
}

/// One dispatch period's consignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    status: BatchStatus,
    consignments: Vec<Consignment>,
    opened_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// The closed, empty stand-in for "no batch exists yet".
    pub fn sentinel() -> Self {
        Self::from_header(BatchRecord::sentinel(), Vec::new())
    }

    /// Open the batch that follows `previous`.
    pub fn open_after(previous: &BatchRecord, opened_at: DateTime<Utc>) -> BatchResult<Self> {
        if previous.is_open() {
            return Err(DomainError::BatchStillOpen(previous.id).into());
        }
        let id = previous.id.next()?;
        Ok(Self {
            id,
            status: BatchStatus::Open,
            consignments: Vec::new(),
            opened_at: Some(opened_at),
            closed_at: None,
        })
    }

    /// Rebuild a batch from its persisted header and consignments.
    pub fn restore(record: BatchRecord, consignments: Vec<Consignment>) -> BatchResult<Self> {
        if let Some(stray) = consignments.iter().find(|c| c.batch_id() != record.id) {
            return Err(DomainError::ForeignConsignment {
                consignment: stray.internal_id(),
                actual: stray.batch_id(),
                expected: record.id,
            }
            .into());
        }
        Ok(Self::from_header(record, consignments))
    }

    fn from_header(record: BatchRecord, consignments: Vec<Consignment>) -> Self {
        Self {
            id: record.id,
            status: record.status,
            consignments,
            opened_at: record.opened_at,
            closed_at: record.closed_at,
        }
    }

    pub fn record(&self) -> BatchRecord {
        BatchRecord {
            id: self.id,
            status: self.status,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == BatchStatus::Open
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn consignments(&self) -> &[Consignment] {
        &self.consignments
    }

    pub fn len(&self) -> usize {
        self.consignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consignments.is_empty()
    }

    pub fn consignment(&self, id: ConsignmentId) -> Option<&Consignment> {
        self.consignments.iter().find(|c| c.internal_id() == id)
    }

    pub fn unsent(&self) -> impl Iterator<Item = &Consignment> {
        self.consignments.iter().filter(|c| !c.is_sent())
    }

    /// Distinct couriers referenced by this batch, in first-seen order.
    pub fn couriers(&self) -> Vec<CourierId> {
        let mut seen = Vec::new();
        for c in &self.consignments {
            if !seen.contains(&c.courier_id()) {
                seen.push(c.courier_id());
            }
        }
        seen
    }

    pub fn add_consignment(&mut self, consignment: Consignment) -> BatchResult<()> {
        if !self.is_open() {
            return Err(BatchError::NotOpen(self.id));
        }
        if consignment.batch_id() != self.id {
            return Err(DomainError::ForeignConsignment {
                consignment: consignment.internal_id(),
                actual: consignment.batch_id(),
                expected: self.id,
            }
            .into());
        }
        self.consignments.push(consignment);
        Ok(())
    }

    /// Push every unsent, not-yet-queued consignment onto its courier's queue.
    ///
    /// Calling this again before a flush queues nothing new. Every courier with
    /// something left to queue must be registered; otherwise nothing is queued.
    /// Returns how many consignments were queued by this call.
    pub fn queue_all_for_dispatch(&mut self, registry: &mut CourierRegistry) -> BatchResult<usize> {
        let missing = self
            .consignments
            .iter()
            .filter(|c| !c.is_queued() && !c.is_sent())
            .map(Consignment::courier_id)
            .find(|id| !registry.contains(*id));
        if let Some(missing) = missing {
            return Err(BatchError::CourierMissing(missing));
        }

        let mut queued = 0;
        for consignment in self
            .consignments
            .iter_mut()
            .filter(|c| !c.is_queued() && !c.is_sent())
        {
            let Some(courier) = registry.get_mut(consignment.courier_id()) else {
                return Err(BatchError::CourierMissing(consignment.courier_id()));
            };
            let entry = consignment.queue_entry();
            let already_pending = courier.pending().contains(&entry);
            if !already_pending && courier.enqueue(entry) {
                queued += 1;
            }
            // A rejected duplicate is already sitting in the queue, so the
            // consignment counts as queued either way.
            consignment.mark_queued();
        }

        debug!(batch_id = %self.id, queued, "batch queued for dispatch");
        Ok(queued)
    }

    /// Mark the given consignments as sent. Ids not in this batch are ignored.
    ///
    /// Returns the ids that actually changed state.
    pub fn mark_sent(&mut self, ids: &[ConsignmentId]) -> Vec<ConsignmentId> {
        self.consignments
            .iter_mut()
            .filter(|c| ids.contains(&c.internal_id()))
            .filter_map(|c| c.mark_sent().then(|| c.internal_id()))
            .collect()
    }

    pub fn close(&mut self, closed_at: DateTime<Utc>) -> BatchResult<()> {
        if !self.is_open() {
            return Err(BatchError::NotOpen(self.id));
        }
        self.status = BatchStatus::Closed;
        self.closed_at = Some(closed_at);
        Ok(())
    }
}
