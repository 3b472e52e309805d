//! Registry of lazily built couriers, keyed by courier id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use consign_core::CourierId;

use crate::courier::{Courier, QueuedConsignment};
use crate::transport::TransportError;

/// How a set of couriers is flushed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// One courier after another on the calling thread.
    #[default]
    Sequential,
    /// One scoped thread per courier; results are joined before returning.
    Concurrent,
}

/// The outcome of flushing one courier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushAttempt {
    pub courier_id: CourierId,
    pub result: Result<Vec<QueuedConsignment>, TransportError>,
    /// Numbers still queued after the attempt (empty on success).
    pub still_pending: Vec<u64>,
}

impl FlushAttempt {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Couriers built so far, at most one per carrier.
#[derive(Debug, Default)]
pub struct CourierRegistry {
    couriers: BTreeMap<CourierId, Courier>,
}

impl CourierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }

    pub fn contains(&self, id: CourierId) -> bool {
        self.couriers.contains_key(&id)
    }

    pub fn get(&self, id: CourierId) -> Option<&Courier> {
        self.couriers.get(&id)
    }

    pub fn get_mut(&mut self, id: CourierId) -> Option<&mut Courier> {
        self.couriers.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Courier> {
        self.couriers.values()
    }

    /// Return the cached courier for `id`, building it with `build` on first use.
    ///
    /// A failed build leaves the registry unchanged.
    pub fn get_or_try_insert_with<E, F>(&mut self, id: CourierId, build: F) -> Result<&mut Courier, E>
    where
        F: FnOnce() -> Result<Courier, E>,
    {
        use std::collections::btree_map::Entry;

        match self.couriers.entry(id) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let courier = build()?;
                debug!(courier = %id, transport = %courier.transport_description(), "courier registered");
                Ok(slot.insert(courier))
            }
        }
    }

    /// Couriers that still hold queued numbers.
    pub fn with_pending(&self) -> Vec<CourierId> {
        self.couriers
            .values()
            .filter(|c| c.has_pending())
            .map(Courier::courier_id)
            .collect()
    }

    /// Flush each listed courier, isolating failures per courier.
    ///
    /// Ids that are not registered are skipped. Results come back in the
    /// order the ids were given, with duplicates removed.
    pub fn flush_many(&mut self, ids: &[CourierId], mode: FlushMode) -> Vec<FlushAttempt> {
        let mut wanted: Vec<CourierId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !wanted.contains(id) {
                wanted.push(*id);
            }
        }

        let mut results = match mode {
            FlushMode::Sequential => self.flush_sequential(&wanted),
            FlushMode::Concurrent => self.flush_concurrent(&wanted),
        };

        let mut attempts = Vec::with_capacity(results.len());
        for id in wanted {
            let Some(pos) = results.iter().position(|(rid, _)| *rid == id) else {
                debug!(courier = %id, "flush requested for unregistered courier; skipped");
                continue;
            };
            let (courier_id, result) = results.swap_remove(pos);
            let still_pending = self
                .couriers
                .get(&courier_id)
                .map(Courier::pending_numbers)
                .unwrap_or_default();
            attempts.push(FlushAttempt {
                courier_id,
                result,
                still_pending,
            });
        }
        attempts
    }

    fn flush_sequential(
        &mut self,
        ids: &[CourierId],
    ) -> Vec<(CourierId, Result<Vec<QueuedConsignment>, TransportError>)> {
        ids.iter()
            .filter_map(|id| self.couriers.get_mut(id).map(|c| (*id, c.flush())))
            .collect()
    }

    fn flush_concurrent(
        &mut self,
        ids: &[CourierId],
    ) -> Vec<(CourierId, Result<Vec<QueuedConsignment>, TransportError>)> {
        let targets: Vec<&mut Courier> = self
            .couriers
            .iter_mut()
            .filter(|(id, _)| ids.contains(*id))
            .map(|(_, c)| c)
            .collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = targets
                .into_iter()
                .map(|courier| {
                    let id = courier.courier_id();
                    (id, scope.spawn(move || courier.flush()))
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        error!(courier = %id, "transport panicked during flush");
                        Err(TransportError::Unavailable(
                            "transport panicked during send".to_string(),
                        ))
                    });
                    (id, result)
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SequentialAllocator;
    use crate::transport::CourierTransport;
    use consign_core::{BatchId, ConsignmentId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        ok: bool,
        calls: AtomicUsize,
    }

    impl CourierTransport for Fixed {
        fn send(&self, _numbers: &[u64]) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(TransportError::Rejected("bad manifest".to_string()))
            }
        }
    }

    fn fixed(ok: bool) -> Arc<Fixed> {
        Arc::new(Fixed {
            ok,
            calls: AtomicUsize::new(0),
        })
    }

    fn build(id: CourierId, transport: Arc<Fixed>) -> Result<Courier, String> {
        Ok(Courier::new(
            id,
            Box::new(transport),
            Box::new(SequentialAllocator::new(1, 1)),
        ))
    }

    fn queue_one(registry: &mut CourierRegistry, id: CourierId, number: u64) {
        registry.get_mut(id).unwrap().enqueue(QueuedConsignment {
            consignment_id: ConsignmentId::from_raw(number),
            batch_id: BatchId::from_raw(1),
            number,
        });
    }

    #[test]
    fn builds_each_courier_once() {
        let mut registry = CourierRegistry::new();
        let mut builds = 0;
        for _ in 0..3 {
            registry
                .get_or_try_insert_with(CourierId::Dpd, || {
                    builds += 1;
                    build(CourierId::Dpd, fixed(true))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_build_registers_nothing() {
        let mut registry = CourierRegistry::new();
        let result = registry
            .get_or_try_insert_with(CourierId::Dhl, || Err::<Courier, _>("not configured".to_string()));
        assert!(result.is_err());
        assert!(!registry.contains(CourierId::Dhl));
    }

    fn failure_is_isolated(mode: FlushMode) {
        let good = fixed(true);
        let bad = fixed(false);
        let mut registry = CourierRegistry::new();
        registry
            .get_or_try_insert_with(CourierId::Dpd, || build(CourierId::Dpd, good.clone()))
            .unwrap();
        registry
            .get_or_try_insert_with(CourierId::Ups, || build(CourierId::Ups, bad.clone()))
            .unwrap();
        queue_one(&mut registry, CourierId::Dpd, 10);
        queue_one(&mut registry, CourierId::Ups, 20);

        let attempts = registry.flush_many(&[CourierId::Ups, CourierId::Dpd], mode);

        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].courier_id, CourierId::Ups);
        assert!(!attempts[0].is_success());
        assert_eq!(attempts[0].still_pending, vec![20]);
        assert_eq!(attempts[1].courier_id, CourierId::Dpd);
        assert!(attempts[1].is_success());
        assert!(attempts[1].still_pending.is_empty());
        assert_eq!(registry.with_pending(), vec![CourierId::Ups]);
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sequential_flush_isolates_failures() {
        failure_is_isolated(FlushMode::Sequential);
    }

    #[test]
    fn concurrent_flush_isolates_failures() {
        failure_is_isolated(FlushMode::Concurrent);
    }

    #[test]
    fn flush_many_skips_unknown_and_duplicate_ids() {
        let mut registry = CourierRegistry::new();
        registry
            .get_or_try_insert_with(CourierId::Dpd, || build(CourierId::Dpd, fixed(true)))
            .unwrap();
        queue_one(&mut registry, CourierId::Dpd, 1);

        let attempts = registry.flush_many(
            &[CourierId::Dpd, CourierId::RoyalMail, CourierId::Dpd],
            FlushMode::Sequential,
        );

        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].courier_id, CourierId::Dpd);
    }
}
