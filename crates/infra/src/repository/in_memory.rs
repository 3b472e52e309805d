use std::sync::RwLock;

use chrono::{DateTime, Utc};
use consign_batch::{BatchRecord, ConsignmentDraft, ConsignmentRecord};
use consign_core::{BatchId, ConsignmentId, CourierId};
use consign_dispatch::{DispatchRepository, RepositoryError};

use super::{Tables, poisoned};

/// In-memory dispatch repository.
///
/// Intended for tests/dev. Wrap it in an `Arc` to share it between a
/// coordinator and the code inspecting it.
#[derive(Debug, Default)]
pub struct InMemoryDispatchRepository {
    tables: RwLock<Tables>,
}

impl InMemoryDispatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored consignment, in insertion order.
    pub fn all_consignments(&self) -> Vec<ConsignmentRecord> {
        match self.tables.read() {
            Ok(t) => t.consignments.clone(),
            Err(_) => vec![],
        }
    }

    pub fn all_batches(&self) -> Vec<BatchRecord> {
        match self.tables.read() {
            Ok(t) => t.batches.clone(),
            Err(_) => vec![],
        }
    }
}

impl DispatchRepository for InMemoryDispatchRepository {
    fn save_batch(&self, batch: &BatchRecord) -> Result<(), RepositoryError> {
        self.tables.write().map_err(|_| poisoned())?.save_batch(batch)
    }

    fn close_batch(&self, id: BatchId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.tables.write().map_err(|_| poisoned())?.close_batch(id, closed_at)
    }

    fn insert_consignment(&self, draft: &ConsignmentDraft) -> Result<ConsignmentId, RepositoryError> {
        self.tables.write().map_err(|_| poisoned())?.insert_consignment(draft)
    }

    fn save_consignment(&self, consignment: &ConsignmentRecord) -> Result<(), RepositoryError> {
        self.tables.write().map_err(|_| poisoned())?.save_consignment(consignment)
    }

    fn load_latest_batch(&self) -> Result<Option<BatchRecord>, RepositoryError> {
        Ok(self.tables.read().map_err(|_| poisoned())?.latest_batch())
    }

    fn load_batch(&self, id: BatchId) -> Result<Option<BatchRecord>, RepositoryError> {
        Ok(self.tables.read().map_err(|_| poisoned())?.batch(id))
    }

    fn load_consignments_for_batch(&self, id: BatchId) -> Result<Vec<ConsignmentRecord>, RepositoryError> {
        Ok(self.tables.read().map_err(|_| poisoned())?.consignments_for_batch(id))
    }

    fn highest_consignment_number(&self, courier: CourierId) -> Result<Option<u64>, RepositoryError> {
        Ok(self.tables.read().map_err(|_| poisoned())?.highest_number(courier))
    }

    fn closed_batches_with_unsent(&self) -> Result<Vec<BatchId>, RepositoryError> {
        Ok(self.tables.read().map_err(|_| poisoned())?.closed_batches_with_unsent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consign_batch::BatchStatus;
    use consign_core::ProductRef;
    use consign_courier::{Courier, SequentialAllocator};

    use crate::transport::RecordingTransport;

    fn open(id: u64) -> BatchRecord {
        BatchRecord {
            id: BatchId::from_raw(id),
            status: BatchStatus::Open,
            opened_at: Some(Utc::now()),
            closed_at: None,
        }
    }

    fn courier(id: CourierId, start: u64) -> Courier {
        Courier::new(
            id,
            Box::new(RecordingTransport::new()),
            Box::new(SequentialAllocator::new(start, 1)),
        )
    }

    #[test]
    fn insert_assigns_increasing_ids_and_tracks_numbers() {
        let repo = InMemoryDispatchRepository::new();
        repo.save_batch(&open(1)).unwrap();
        let mut dpd = courier(CourierId::Dpd, 40);
        let products = vec![ProductRef::new("SKU", 10, 1)];

        let a = ConsignmentDraft::new(BatchId::from_raw(1), products.clone(), &mut dpd, Utc::now()).unwrap();
        let b = ConsignmentDraft::new(BatchId::from_raw(1), products, &mut dpd, Utc::now()).unwrap();
        let id_a = repo.insert_consignment(&a).unwrap();
        let id_b = repo.insert_consignment(&b).unwrap();

        assert!(id_b > id_a);
        assert_eq!(repo.highest_consignment_number(CourierId::Dpd).unwrap(), Some(41));
        assert_eq!(repo.highest_consignment_number(CourierId::Ups).unwrap(), None);
        let rows = repo.load_consignments_for_batch(BatchId::from_raw(1)).unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![id_a, id_b]);
        assert!(rows.iter().all(|r| !r.sent));
    }

    #[test]
    fn insert_into_unknown_batch_is_rejected() {
        let repo = InMemoryDispatchRepository::new();
        let mut dhl = courier(CourierId::Dhl, 1);
        let draft =
            ConsignmentDraft::new(BatchId::from_raw(5), vec![ProductRef::new("X", 1, 1)], &mut dhl, Utc::now()).unwrap();
        assert!(matches!(repo.insert_consignment(&draft), Err(RepositoryError::NotFound(_))));
        assert!(repo.all_consignments().is_empty());
    }

    #[test]
    fn reissued_number_is_a_conflict() {
        let repo = InMemoryDispatchRepository::new();
        repo.save_batch(&open(1)).unwrap();
        let products = vec![ProductRef::new("X", 1, 1)];
        let mut first = courier(CourierId::Ups, 7);
        let mut restarted = courier(CourierId::Ups, 7);

        let a = ConsignmentDraft::new(BatchId::from_raw(1), products.clone(), &mut first, Utc::now()).unwrap();
        let b = ConsignmentDraft::new(BatchId::from_raw(1), products, &mut restarted, Utc::now()).unwrap();
        repo.insert_consignment(&a).unwrap();
        assert!(matches!(repo.insert_consignment(&b), Err(RepositoryError::Conflict(_))));
    }

    #[test]
    fn save_consignment_persists_sent_flag() {
        let repo = InMemoryDispatchRepository::new();
        repo.save_batch(&open(1)).unwrap();
        let mut rm = courier(CourierId::RoyalMail, 1);
        let draft =
            ConsignmentDraft::new(BatchId::from_raw(1), vec![ProductRef::new("X", 1, 1)], &mut rm, Utc::now()).unwrap();
        let id = repo.insert_consignment(&draft).unwrap();

        let mut row = repo.all_consignments().remove(0);
        row.sent = true;
        repo.save_consignment(&row).unwrap();

        assert!(repo.load_consignments_for_batch(BatchId::from_raw(1)).unwrap()[0].sent);
        assert_eq!(repo.all_consignments()[0].id, id);
    }
}
