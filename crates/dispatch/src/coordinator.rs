//! The dispatch coordinator: one open batch at a time.
//!
//! ## State machine
//!
//! ```text
//! NoOpenBatch --open_batch--> HasOpenBatch --close_current_batch--> NoOpenBatch
//! ```
//!
//! `open_batch` is idempotent while a batch is held, and resumes a batch that
//! the repository still has open (e.g. after a crash mid-period).
//!
//! ## Close policy
//!
//! Closing claims the batch in the repository first
//! ([`DispatchRepository::close_batch`]), so when several coordinators share a
//! store only one of them ever queues and flushes a given batch. The others
//! get `BatchNotOpen` and drop their stale copy.
//!
//! A batch always closes once it is claimed. A courier whose flush fails keeps
//! its numbers queued; the failure is reported in the returned [`CloseReport`]
//! and the numbers go out on the next flush of that courier
//! ([`DispatchCoordinator::retry_pending`] or a later close).
//!
//! ## Delivered but not recorded
//!
//! A consignment the carrier accepted whose `sent` flag could not be stored is
//! kept in an in-memory set and saved before the next close, retry or
//! requeue. Until that save succeeds those operations fail, so a delivered
//! number is never requeued and sent again.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use consign_batch::{Batch, BatchRecord, Consignment, ConsignmentDraft};
use consign_core::{BatchId, ConsignmentId, CourierId, DomainError, ProductRef};
use consign_courier::{Courier, CourierRegistry, FlushAttempt, FlushMode};

use crate::error::{DispatchError, DispatchResult};
use crate::ports::{CarrierDirectory, CourierSelector, DispatchRepository, RepositoryError};
use crate::report::{CloseReport, CourierOutcome, FlushReport};

type Unsettled = BTreeMap<BatchId, BTreeSet<ConsignmentId>>;

#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    pub flush_mode: FlushMode,
}

impl CoordinatorConfig {
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }
}

/// Owns the current-batch slot and the courier registry.
///
/// All mutating operations take `&mut self`; a coordinator is the single
/// writer for its dispatch workflow. Cross-process exclusion is the
/// repository's job (see [`DispatchRepository`]).
pub struct DispatchCoordinator<R, S, D> {
    repository: R,
    selector: S,
    carriers: D,
    couriers: CourierRegistry,
    current: Option<Batch>,
    unsettled: Unsettled,
    config: CoordinatorConfig,
}

impl<R, S, D> DispatchCoordinator<R, S, D>
where
    R: DispatchRepository,
    S: CourierSelector,
    D: CarrierDirectory,
{
    pub fn new(repository: R, selector: S, carriers: D) -> Self {
        Self {
            repository,
            selector,
            carriers,
            couriers: CourierRegistry::new(),
            current: None,
            unsettled: Unsettled::new(),
            config: CoordinatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn current_batch(&self) -> Option<&Batch> {
        self.current.as_ref()
    }

    pub fn courier(&self, id: CourierId) -> Option<&Courier> {
        self.couriers.get(id)
    }

    pub fn couriers(&self) -> &CourierRegistry {
        &self.couriers
    }

    /// Queued but unsent numbers, per courier.
    pub fn pending_obligations(&self) -> Vec<(CourierId, Vec<u64>)> {
        self.couriers
            .iter()
            .filter(|c| c.has_pending())
            .map(|c| (c.courier_id(), c.pending_numbers()))
            .collect()
    }

    /// Delivered consignments whose `sent` flag is not stored yet.
    pub fn unsettled_deliveries(&self) -> Vec<ConsignmentId> {
        self.unsettled.values().flatten().copied().collect()
    }

    /// The batch with the highest id, or the closed sentinel if none exists.
    pub fn latest_batch(&self) -> DispatchResult<Batch> {
        match self.repository.load_latest_batch()? {
            Some(record) => Self::restore_batch(&self.repository, record),
            None => Ok(Batch::sentinel()),
        }
    }

    pub fn open_batch(&mut self) -> DispatchResult<BatchId> {
        if let Some(id) = self.current.as_ref().filter(|b| b.is_open()).map(Batch::batch_id) {
            if self.stored_open(id)? {
                return Ok(id);
            }
            self.drop_stale_current(id);
        }

        let latest = self
            .repository
            .load_latest_batch()?
            .unwrap_or_else(BatchRecord::sentinel);

        let batch = if latest.is_open() {
            let batch = Self::restore_batch(&self.repository, latest)?;
            info!(batch_id = %batch.batch_id(), consignments = batch.len(), "resumed open batch");
            batch
        } else {
            let batch = Batch::open_after(&latest, Utc::now())?;
            self.repository.save_batch(&batch.record())?;
            info!(batch_id = %batch.batch_id(), "opened batch");
            batch
        };

        let id = batch.batch_id();
        self.current = Some(batch);
        Ok(id)
    }

    pub fn create_consignment(&mut self, products: Vec<ProductRef>) -> DispatchResult<Consignment> {
        let batch_id = match self.current.as_ref() {
            Some(batch) if batch.is_open() => batch.batch_id(),
            _ => return Err(DispatchError::BatchNotOpen),
        };
        ProductRef::validate_all(&products)?;

        let courier_id = self.selector.select_courier(&products);
        let courier = Self::ensure_courier(&mut self.couriers, &self.repository, &self.carriers, courier_id)?;
        let draft = ConsignmentDraft::new(batch_id, products, courier, Utc::now())?;
        let id = match self.repository.insert_consignment(&draft) {
            Ok(id) => id,
            Err(err) => {
                if !self.stored_open(batch_id)? {
                    self.drop_stale_current(batch_id);
                    return Err(DispatchError::BatchNotOpen);
                }
                return Err(err.into());
            }
        };
        let consignment = Consignment::create(draft, id);

        let batch = self.current.as_mut().ok_or(DispatchError::BatchNotOpen)?;
        batch.add_consignment(consignment.clone())?;

        info!(
            batch_id = %batch_id,
            consignment_id = %id,
            courier = %courier_id,
            number = consignment.consignment_number(),
            "consignment created"
        );
        Ok(consignment)
    }

    /// Claim, queue and flush the current batch.
    ///
    /// After the claim the batch is reloaded from the repository, so
    /// consignments other coordinators added to it are dispatched too. Besides
    /// the batch's own couriers, every courier still holding numbers from
    /// earlier batches is flushed. An error after the claim leaves the batch
    /// closed in storage with its unsent consignments recoverable through
    /// [`DispatchCoordinator::requeue_unsent`].
    pub fn close_current_batch(&mut self) -> DispatchResult<CloseReport> {
        let (batch_id, known) = match self.current.as_ref() {
            Some(batch) if batch.is_open() => (batch.batch_id(), batch.couriers()),
            _ => return Err(DispatchError::BatchNotOpen),
        };
        Self::persist_unsettled(&self.repository, &mut self.unsettled, self.current.as_mut())?;
        for courier_id in &known {
            Self::ensure_courier(&mut self.couriers, &self.repository, &self.carriers, *courier_id)?;
        }

        let closed_at = Utc::now();
        match self.repository.close_batch(batch_id, closed_at) {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_) | RepositoryError::NotFound(_)) => {
                self.drop_stale_current(batch_id);
                return Err(DispatchError::BatchNotOpen);
            }
            Err(err) => return Err(err.into()),
        }
        self.current = None;

        let record = self
            .repository
            .load_batch(batch_id)?
            .ok_or(DomainError::BatchNotFound(batch_id))?;
        let mut batch = Self::restore_batch(&self.repository, record)?;
        let touched = batch.couriers();
        for courier_id in &touched {
            Self::ensure_courier(&mut self.couriers, &self.repository, &self.carriers, *courier_id)?;
        }
        let queued = batch.queue_all_for_dispatch(&mut self.couriers)?;

        let mut targets = touched.clone();
        targets.extend(self.couriers.with_pending());
        let attempts = self.couriers.flush_many(&targets, self.config.flush_mode);
        let flush = Self::settle(&self.repository, &mut self.unsettled, attempts, Some(&mut batch))?;

        let report = CloseReport {
            batch_id,
            consignments: batch.len(),
            queued,
            flush,
        };
        if report.is_clean() {
            info!(batch_id = %batch_id, consignments = report.consignments, couriers = touched.len(), "batch closed");
        } else {
            warn!(
                batch_id = %batch_id,
                consignments = report.consignments,
                failed = ?report.failed_couriers(),
                "batch closed with undelivered consignments"
            );
        }
        Ok(report)
    }

    /// Flush every courier that still has queued numbers.
    pub fn retry_pending(&mut self) -> DispatchResult<FlushReport> {
        let pending = self.couriers.with_pending();
        if pending.is_empty() && self.unsettled.is_empty() {
            debug!("no pending obligations to retry");
            return Ok(FlushReport::default());
        }
        let attempts = self.couriers.flush_many(&pending, self.config.flush_mode);
        let report = Self::settle(&self.repository, &mut self.unsettled, attempts, self.current.as_mut())?;
        info!(
            couriers = pending.len(),
            marked_sent = report.marked_sent,
            failed = ?report.failed_couriers(),
            "retried pending flushes"
        );
        Ok(report)
    }

    /// Put a closed batch's unsent consignments back on their courier queues.
    ///
    /// Queues live in memory, so after a restart this is how a retry job picks
    /// up numbers that never made it out. Entries already queued in this
    /// process are not queued twice. Returns how many were queued.
    pub fn requeue_unsent(&mut self, batch_id: BatchId) -> DispatchResult<usize> {
        if self.current.as_ref().is_some_and(|b| b.batch_id() == batch_id) {
            return Err(DomainError::CurrentBatch(batch_id).into());
        }
        Self::persist_unsettled(&self.repository, &mut self.unsettled, self.current.as_mut())?;

        let record = self
            .repository
            .load_batch(batch_id)?
            .ok_or(DomainError::BatchNotFound(batch_id))?;
        if record.is_open() {
            return Err(DomainError::BatchStillOpen(batch_id).into());
        }

        let mut batch = Self::restore_batch(&self.repository, record)?;
        let couriers: Vec<CourierId> = {
            let mut ids: Vec<CourierId> = batch.unsent().map(Consignment::courier_id).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        for courier_id in &couriers {
            Self::ensure_courier(&mut self.couriers, &self.repository, &self.carriers, *courier_id)?;
        }
        let queued = batch.queue_all_for_dispatch(&mut self.couriers)?;
        info!(batch_id = %batch_id, queued, "requeued unsent consignments");
        Ok(queued)
    }

    /// [`DispatchCoordinator::requeue_unsent`] for every closed batch that
    /// still holds unsent consignments.
    pub fn requeue_all_unsent(&mut self) -> DispatchResult<usize> {
        let batches = self.repository.closed_batches_with_unsent()?;
        let mut queued = 0;
        for batch_id in &batches {
            queued += self.requeue_unsent(*batch_id)?;
        }
        if !batches.is_empty() {
            info!(batches = batches.len(), queued, "requeued unsent consignments of closed batches");
        }
        Ok(queued)
    }

    fn stored_open(&self, batch_id: BatchId) -> DispatchResult<bool> {
        Ok(self
            .repository
            .load_batch(batch_id)?
            .is_some_and(|record| record.is_open()))
    }

    fn drop_stale_current(&mut self, batch_id: BatchId) {
        warn!(batch_id = %batch_id, "batch is no longer open in the repository; dropping it");
        self.current = None;
    }

    fn ensure_courier<'a>(
        couriers: &'a mut CourierRegistry,
        repository: &R,
        carriers: &D,
        courier_id: CourierId,
    ) -> DispatchResult<&'a mut Courier> {
        couriers.get_or_try_insert_with(courier_id, || -> DispatchResult<Courier> {
            let highest = repository.highest_consignment_number(courier_id)?;
            let transport = carriers.resolve_transport(courier_id)?;
            let allocator = carriers.resolve_allocator(courier_id, highest)?;
            info!(courier = %courier_id, transport = %transport.describe(), "courier ready");
            Ok(Courier::new(courier_id, transport, allocator))
        })
    }

    fn restore_batch(repository: &R, record: BatchRecord) -> DispatchResult<Batch> {
        let consignments = repository
            .load_consignments_for_batch(record.id)?
            .into_iter()
            .map(Consignment::restore)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Batch::restore(record, consignments)?)
    }

    /// Turn flush attempts into a report and persist every consignment that
    /// was delivered. Entries may belong to earlier batches than `current`.
    fn settle(
        repository: &R,
        unsettled: &mut Unsettled,
        attempts: Vec<FlushAttempt>,
        current: Option<&mut Batch>,
    ) -> DispatchResult<FlushReport> {
        let mut outcomes = Vec::with_capacity(attempts.len());

        for attempt in attempts {
            match attempt.result {
                Ok(entries) => {
                    let numbers = entries.iter().map(|e| e.number).collect();
                    for entry in entries {
                        unsettled.entry(entry.batch_id).or_default().insert(entry.consignment_id);
                    }
                    outcomes.push(CourierOutcome::Flushed {
                        courier: attempt.courier_id,
                        numbers,
                    });
                }
                Err(error) => {
                    warn!(
                        courier = %attempt.courier_id,
                        error = %error,
                        pending = ?attempt.still_pending,
                        "courier flush failed; numbers kept for retry"
                    );
                    outcomes.push(CourierOutcome::Failed {
                        courier: attempt.courier_id,
                        error,
                        pending: attempt.still_pending,
                    });
                }
            }
        }

        let marked_sent = Self::persist_unsettled(repository, unsettled, current)?;
        Ok(FlushReport {
            outcomes,
            marked_sent,
        })
    }

    /// Store `sent` for every unsettled delivery. Ids leave the set only once
    /// their save succeeds. Returns how many consignments were saved.
    fn persist_unsettled(
        repository: &R,
        unsettled: &mut Unsettled,
        mut current: Option<&mut Batch>,
    ) -> DispatchResult<usize> {
        let mut saved = 0;
        while let Some((batch_id, mut ids)) = unsettled.pop_first() {
            let result = Self::persist_sent(repository, current.as_deref_mut(), batch_id, &mut ids);
            if !ids.is_empty() {
                unsettled.insert(batch_id, ids);
            }
            saved += result.inspect_err(|e| {
                warn!(batch_id = %batch_id, error = %e, "could not record delivered consignments; will retry");
            })?;
        }
        Ok(saved)
    }

    fn persist_sent(
        repository: &R,
        current: Option<&mut Batch>,
        batch_id: BatchId,
        ids: &mut BTreeSet<ConsignmentId>,
    ) -> DispatchResult<usize> {
        let mut restored;
        let batch = match current.filter(|b| b.batch_id() == batch_id) {
            Some(batch) => batch,
            None => {
                let Some(record) = repository.load_batch(batch_id)? else {
                    warn!(batch_id = %batch_id, "delivered consignments belong to a batch that is not stored");
                    ids.clear();
                    return Ok(0);
                };
                restored = Self::restore_batch(repository, record)?;
                &mut restored
            }
        };

        let delivered: Vec<ConsignmentId> = ids.iter().copied().collect();
        batch.mark_sent(&delivered);
        let mut saved = 0;
        for id in delivered {
            if let Some(consignment) = batch.consignment(id) {
                repository.save_consignment(&consignment.record())?;
                saved += 1;
            }
            ids.remove(&id);
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::DateTime;
    use consign_batch::{BatchStatus, ConsignmentRecord};
    use consign_courier::{CourierTransport, NumberAllocator, SequentialAllocator, TransportError};

    use crate::ports::CarrierError;

    #[derive(Default)]
    struct Rows {
        batches: Vec<BatchRecord>,
        consignments: Vec<ConsignmentRecord>,
        failing_saves: usize,
    }

    #[derive(Default)]
    struct Memory(Mutex<Rows>);

    impl DispatchRepository for Memory {
        fn save_batch(&self, batch: &BatchRecord) -> Result<(), RepositoryError> {
            let mut rows = self.0.lock().unwrap();
            rows.batches.retain(|b| b.id != batch.id);
            rows.batches.push(batch.clone());
            Ok(())
        }

        fn close_batch(&self, id: BatchId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError> {
            let mut rows = self.0.lock().unwrap();
            let batch = rows
                .batches
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
            if !batch.is_open() {
                return Err(RepositoryError::Conflict(format!("batch {id} is closed")));
            }
            batch.status = BatchStatus::Closed;
            batch.closed_at = Some(closed_at);
            Ok(())
        }

        fn insert_consignment(&self, draft: &ConsignmentDraft) -> Result<ConsignmentId, RepositoryError> {
            let mut rows = self.0.lock().unwrap();
            if !rows.batches.iter().any(|b| b.id == draft.batch_id() && b.is_open()) {
                return Err(RepositoryError::Conflict(format!("batch {} is not open", draft.batch_id())));
            }
            let id = ConsignmentId::from_raw(rows.consignments.len() as u64 + 1);
            rows.consignments.push(ConsignmentRecord {
                id,
                batch_id: draft.batch_id(),
                products: draft.products().to_vec(),
                courier_id: draft.courier_id(),
                consignment_number: draft.number(),
                sent: false,
                created_at: draft.created_at(),
            });
            Ok(id)
        }

        fn save_consignment(&self, consignment: &ConsignmentRecord) -> Result<(), RepositoryError> {
            let mut rows = self.0.lock().unwrap();
            if rows.failing_saves > 0 {
                rows.failing_saves -= 1;
                return Err(RepositoryError::Storage("disk full".to_string()));
            }
            let row = rows
                .consignments
                .iter_mut()
                .find(|c| c.id == consignment.id)
                .ok_or_else(|| RepositoryError::NotFound(consignment.id.to_string()))?;
            *row = consignment.clone();
            Ok(())
        }

        fn load_latest_batch(&self) -> Result<Option<BatchRecord>, RepositoryError> {
            Ok(self.0.lock().unwrap().batches.iter().max_by_key(|b| b.id).cloned())
        }

        fn load_batch(&self, id: BatchId) -> Result<Option<BatchRecord>, RepositoryError> {
            Ok(self.0.lock().unwrap().batches.iter().find(|b| b.id == id).cloned())
        }

        fn load_consignments_for_batch(&self, id: BatchId) -> Result<Vec<ConsignmentRecord>, RepositoryError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .consignments
                .iter()
                .filter(|c| c.batch_id == id)
                .cloned()
                .collect())
        }

        fn highest_consignment_number(&self, courier: CourierId) -> Result<Option<u64>, RepositoryError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .consignments
                .iter()
                .filter(|c| c.courier_id == courier)
                .map(|c| c.consignment_number)
                .max())
        }
    }

    struct Toggle(Mutex<bool>);

    impl CourierTransport for Toggle {
        fn send(&self, _numbers: &[u64]) -> Result<(), TransportError> {
            if *self.0.lock().unwrap() {
                Ok(())
            } else {
                Err(TransportError::Unavailable("offline".to_string()))
            }
        }
    }

    /// Every courier shares one transport whose availability tests flip.
    struct Carriers {
        transport: Arc<Toggle>,
        configured: Vec<CourierId>,
    }

    impl CarrierDirectory for Carriers {
        fn resolve_transport(&self, courier: CourierId) -> Result<Box<dyn CourierTransport>, CarrierError> {
            if !self.configured.contains(&courier) {
                return Err(CarrierError::NotConfigured(courier));
            }
            Ok(Box::new(self.transport.clone()))
        }

        fn resolve_allocator(
            &self,
            _courier: CourierId,
            highest_issued: Option<u64>,
        ) -> Result<Box<dyn NumberAllocator>, CarrierError> {
            Ok(Box::new(SequentialAllocator::resume_after(highest_issued, 100, 1)))
        }
    }

    fn by_sku(products: &[ProductRef]) -> CourierId {
        if products[0].sku.starts_with('U') {
            CourierId::Ups
        } else {
            CourierId::Dpd
        }
    }

    type TestCoordinator = DispatchCoordinator<Arc<Memory>, fn(&[ProductRef]) -> CourierId, Carriers>;

    fn coordinator(online: bool) -> (TestCoordinator, Arc<Toggle>, Arc<Memory>) {
        let repository = Arc::new(Memory::default());
        let transport = Arc::new(Toggle(Mutex::new(online)));
        let carriers = Carriers {
            transport: transport.clone(),
            configured: vec![CourierId::Dpd, CourierId::Ups],
        };
        let coordinator = DispatchCoordinator::new(
            repository.clone(),
            by_sku as fn(&[ProductRef]) -> CourierId,
            carriers,
        );
        (coordinator, transport, repository)
    }

    fn product(sku: &str) -> Vec<ProductRef> {
        vec![ProductRef::new(sku, 250, 1000)]
    }

    #[test]
    fn create_without_open_batch_fails_without_side_effects() {
        let (mut c, _, repo) = coordinator(true);
        assert_eq!(c.create_consignment(product("D-1")), Err(DispatchError::BatchNotOpen));
        assert!(c.couriers().is_empty());
        assert!(repo.0.lock().unwrap().consignments.is_empty());
    }

    #[test]
    fn empty_products_are_a_validation_error() {
        let (mut c, _, _) = coordinator(true);
        c.open_batch().unwrap();
        assert!(matches!(c.create_consignment(vec![]), Err(DispatchError::Validation(_))));
        assert!(c.current_batch().unwrap().is_empty());
        assert!(c.couriers().is_empty());
    }

    #[test]
    fn unconfigured_courier_surfaces_carrier_error() {
        let repository = Arc::new(Memory::default());
        let carriers = Carriers {
            transport: Arc::new(Toggle(Mutex::new(true))),
            configured: vec![],
        };
        let mut c = DispatchCoordinator::new(
            repository,
            by_sku as fn(&[ProductRef]) -> CourierId,
            carriers,
        );
        c.open_batch().unwrap();
        assert_eq!(
            c.create_consignment(product("D-1")),
            Err(DispatchError::Carrier(CarrierError::NotConfigured(CourierId::Dpd)))
        );
        assert!(c.current_batch().unwrap().is_empty());
    }

    #[test]
    fn open_is_idempotent_and_ids_increase() {
        let (mut c, _, _) = coordinator(true);
        let first = c.open_batch().unwrap();
        assert_eq!(c.open_batch().unwrap(), first);
        c.close_current_batch().unwrap();
        let second = c.open_batch().unwrap();
        assert_eq!(second.value(), first.value() + 1);
    }

    #[test]
    fn second_close_fails() {
        let (mut c, _, _) = coordinator(true);
        c.open_batch().unwrap();
        c.close_current_batch().unwrap();
        assert_eq!(c.close_current_batch(), Err(DispatchError::BatchNotOpen));
    }

    #[test]
    fn failed_flush_is_delivered_by_retry() {
        let (mut c, transport, repo) = coordinator(false);
        c.open_batch().unwrap();
        let a = c.create_consignment(product("D-1")).unwrap();
        let report = c.close_current_batch().unwrap();
        assert_eq!(report.failed_couriers(), vec![CourierId::Dpd]);
        assert_eq!(c.pending_obligations(), vec![(CourierId::Dpd, vec![a.consignment_number()])]);

        *transport.0.lock().unwrap() = true;
        let retry = c.retry_pending().unwrap();

        assert!(retry.is_clean());
        assert_eq!(retry.marked_sent, 1);
        assert!(c.pending_obligations().is_empty());
        assert!(repo.0.lock().unwrap().consignments.iter().all(|r| r.sent));
    }

    #[test]
    fn latest_batch_is_sentinel_before_first_open() {
        let (c, _, _) = coordinator(true);
        let latest = c.latest_batch().unwrap();
        assert_eq!(latest.batch_id(), BatchId::SENTINEL);
        assert!(!latest.is_open());
    }

    fn sent_flags(repo: &Memory) -> Vec<bool> {
        repo.0.lock().unwrap().consignments.iter().map(|r| r.sent).collect()
    }

    #[test]
    fn failed_sent_save_is_recorded_before_anything_is_resent() {
        let (mut c, _, repo) = coordinator(true);
        c.open_batch().unwrap();
        let a = c.create_consignment(product("D-1")).unwrap();
        repo.0.lock().unwrap().failing_saves = 1;

        let err = c.close_current_batch().unwrap_err();
        assert_eq!(err, DispatchError::Repository(RepositoryError::Storage("disk full".to_string())));
        assert!(c.current_batch().is_none());
        assert_eq!(c.unsettled_deliveries(), vec![a.internal_id()]);
        assert_eq!(sent_flags(&repo), vec![false]);
        let stored = repo.load_batch(a.batch_id()).unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Closed);

        assert_eq!(c.close_current_batch(), Err(DispatchError::BatchNotOpen));
        let retry = c.retry_pending().unwrap();
        assert_eq!(retry.marked_sent, 1);
        assert!(c.unsettled_deliveries().is_empty());
        assert_eq!(sent_flags(&repo), vec![true]);

        // nothing left to send again
        assert_eq!(c.requeue_unsent(a.batch_id()).unwrap(), 0);
        assert!(c.pending_obligations().is_empty());
    }

    #[test]
    fn requeue_waits_for_unsettled_deliveries() {
        let (mut c, _, repo) = coordinator(true);
        c.open_batch().unwrap();
        let a = c.create_consignment(product("D-1")).unwrap();
        repo.0.lock().unwrap().failing_saves = 2;
        assert!(c.close_current_batch().is_err());

        // the retried save fails too, so requeueing must not happen
        assert!(matches!(c.requeue_unsent(a.batch_id()), Err(DispatchError::Repository(_))));
        assert!(c.pending_obligations().is_empty());

        assert_eq!(c.requeue_unsent(a.batch_id()).unwrap(), 0);
        assert_eq!(sent_flags(&repo), vec![true]);
    }

    #[test]
    fn close_claimed_by_another_coordinator_is_not_flushed_twice() {
        let (mut first, transport, repo) = coordinator(true);
        first.open_batch().unwrap();
        first.create_consignment(product("D-1")).unwrap();

        let mut second = DispatchCoordinator::new(
            repo.clone(),
            by_sku as fn(&[ProductRef]) -> CourierId,
            Carriers {
                transport,
                configured: vec![CourierId::Dpd, CourierId::Ups],
            },
        );
        assert_eq!(second.open_batch().unwrap(), BatchId::from_raw(1));
        assert_eq!(second.close_current_batch().unwrap().flush.marked_sent, 1);

        assert_eq!(first.close_current_batch(), Err(DispatchError::BatchNotOpen));
        assert!(first.current_batch().is_none());
        assert!(first.pending_obligations().is_empty());
    }

    #[test]
    fn stale_batch_rejects_new_consignments() {
        let (mut c, _, repo) = coordinator(true);
        let id = c.open_batch().unwrap();
        repo.close_batch(id, Utc::now()).unwrap();

        assert_eq!(c.create_consignment(product("D-1")), Err(DispatchError::BatchNotOpen));
        assert!(c.current_batch().is_none());
        assert!(repo.0.lock().unwrap().consignments.is_empty());
        assert_eq!(c.open_batch().unwrap(), BatchId::from_raw(2));
    }

    #[test]
    fn requeue_all_picks_up_every_closed_batch() {
        let (mut c, transport, repo) = coordinator(false);
        c.open_batch().unwrap();
        let a = c.create_consignment(product("D-1")).unwrap();
        c.close_current_batch().unwrap();
        c.open_batch().unwrap();
        let b = c.create_consignment(product("U-1")).unwrap();
        c.close_current_batch().unwrap();

        // a fresh coordinator has empty queues
        let (mut fresh, _, _) = coordinator(true);
        fresh.repository = repo.clone();
        fresh.carriers.transport = transport.clone();
        *transport.0.lock().unwrap() = true;

        assert_eq!(fresh.requeue_all_unsent().unwrap(), 2);
        assert_eq!(
            fresh.pending_obligations(),
            vec![(CourierId::Dpd, vec![a.consignment_number()]), (CourierId::Ups, vec![b.consignment_number()])]
        );
        assert_eq!(fresh.retry_pending().unwrap().marked_sent, 2);
        assert_eq!(sent_flags(&repo), vec![true, true]);
        assert!(repo.closed_batches_with_unsent().unwrap().is_empty());
    }
}
