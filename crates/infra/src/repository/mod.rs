//! `DispatchRepository` implementations.
//!
//! Both adapters share [`Tables`], so the in-memory and file-backed stores
//! enforce exactly the same rules.

mod in_memory;
mod json_file;

pub use in_memory::InMemoryDispatchRepository;
pub use json_file::JsonFileDispatchRepository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use consign_batch::{BatchRecord, BatchStatus, ConsignmentDraft, ConsignmentRecord};
use consign_core::{BatchId, ConsignmentId, CourierId};
use consign_dispatch::RepositoryError;

/// Row storage. Batches are kept in id order, consignments in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Tables {
    batches: Vec<BatchRecord>,
    consignments: Vec<ConsignmentRecord>,
    last_consignment_id: u64,
}

impl Tables {
    pub(crate) fn save_batch(&mut self, batch: &BatchRecord) -> Result<(), RepositoryError> {
        if batch.is_sentinel() {
            return Err(RepositoryError::Conflict("the sentinel batch is never stored".to_string()));
        }
        if batch.is_open() {
            if let Some(other) = self.batches.iter().find(|b| b.is_open() && b.id != batch.id) {
                return Err(RepositoryError::Conflict(format!(
                    "batch {} is already open; cannot open {}",
                    other.id, batch.id
                )));
            }
        }

        match self.batches.binary_search_by_key(&batch.id, |b| b.id) {
            Ok(idx) => {
                if !self.batches[idx].is_open() && batch.is_open() {
                    return Err(RepositoryError::Conflict(format!("batch {} is closed and cannot reopen", batch.id)));
                }
                self.batches[idx] = batch.clone();
            }
            Err(idx) => self.batches.insert(idx, batch.clone()),
        }
        Ok(())
    }

    pub(crate) fn close_batch(&mut self, id: BatchId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let batch = self
            .batches
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("batch {id}")))?;
        if !batch.is_open() {
            return Err(RepositoryError::Conflict(format!("batch {id} is already closed")));
        }
        batch.status = BatchStatus::Closed;
        batch.closed_at = Some(closed_at);
        Ok(())
    }

    pub(crate) fn insert_consignment(&mut self, draft: &ConsignmentDraft) -> Result<ConsignmentId, RepositoryError> {
        let batch_id = draft.batch_id();
        match self.batches.iter().find(|b| b.id == batch_id) {
            None => return Err(RepositoryError::NotFound(format!("batch {batch_id}"))),
            Some(batch) if !batch.is_open() => {
                return Err(RepositoryError::Conflict(format!("batch {batch_id} is closed")));
            }
            Some(_) => {}
        }
        let duplicate = self
            .consignments
            .iter()
            .any(|c| c.courier_id == draft.courier_id() && c.consignment_number == draft.number());
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "{} already issued consignment number {}",
                draft.courier_id(),
                draft.number()
            )));
        }

        let next = self
            .last_consignment_id
            .checked_add(1)
            .ok_or_else(|| RepositoryError::Storage("consignment id space exhausted".to_string()))?;
        let id = ConsignmentId::from_raw(next);
        self.consignments.push(ConsignmentRecord {
            id,
            batch_id,
            products: draft.products().to_vec(),
            courier_id: draft.courier_id(),
            consignment_number: draft.number(),
            sent: false,
            created_at: draft.created_at(),
        });
        self.last_consignment_id = next;
        Ok(id)
    }

    pub(crate) fn save_consignment(&mut self, consignment: &ConsignmentRecord) -> Result<(), RepositoryError> {
        let row = self
            .consignments
            .iter_mut()
            .find(|c| c.id == consignment.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("consignment {}", consignment.id)))?;
        if row.batch_id != consignment.batch_id {
            return Err(RepositoryError::Conflict(format!(
                "consignment {} belongs to batch {}",
                consignment.id, row.batch_id
            )));
        }
        *row = consignment.clone();
        Ok(())
    }

    pub(crate) fn latest_batch(&self) -> Option<BatchRecord> {
        self.batches.last().cloned()
    }

    pub(crate) fn batch(&self, id: BatchId) -> Option<BatchRecord> {
        self.batches.iter().find(|b| b.id == id).cloned()
    }

    pub(crate) fn consignments_for_batch(&self, id: BatchId) -> Vec<ConsignmentRecord> {
        self.consignments
            .iter()
            .filter(|c| c.batch_id == id)
            .cloned()
            .collect()
    }

    pub(crate) fn closed_batches_with_unsent(&self) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self
            .consignments
            .iter()
            .filter(|c| !c.sent)
            .map(|c| c.batch_id)
            .filter(|id| self.batch(*id).is_some_and(|b| !b.is_open()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub(crate) fn highest_number(&self, courier: CourierId) -> Option<u64> {
        self.consignments
            .iter()
            .filter(|c| c.courier_id == courier)
            .map(|c| c.consignment_number)
            .max()
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Storage("lock poisoned".to_string())
}
