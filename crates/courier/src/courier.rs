//! One carrier's pending-send queue.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use consign_core::{BatchId, ConsignmentId, CourierId};

use crate::allocator::{AllocationError, NumberAllocator};
use crate::transport::{CourierTransport, TransportError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CourierError {
    /// The allocator handed out a number that is still waiting in the queue.
    #[error("courier {courier} allocated number {number} which is still queued")]
    NumberCollision { courier: CourierId, number: u64 },

    #[error("courier {courier} could not allocate a number: {source}")]
    Allocation {
        courier: CourierId,
        #[source]
        source: AllocationError,
    },
}

/// A consignment number waiting to be sent, tagged with the consignment it belongs to.
///
/// Only `number` reaches the transport; the ids let the caller mark the right
/// consignments as sent once a flush succeeds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueuedConsignment {
    pub consignment_id: ConsignmentId,
    pub batch_id: BatchId,
    pub number: u64,
}

/// A carrier with its transport, number allocator and pending queue.
///
/// The queue outlives batches: numbers that failed to send stay queued until
/// a later flush succeeds.
pub struct Courier {
    id: CourierId,
    transport: Box<dyn CourierTransport>,
    allocator: Box<dyn NumberAllocator>,
    queue: Vec<QueuedConsignment>,
}

impl core::fmt::Debug for Courier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Courier")
            .field("id", &self.id)
            .field("transport", &self.transport.describe())
            .field("queue", &self.queue)
            .finish()
    }
}

impl Courier {
    pub fn new(
        id: CourierId,
        transport: Box<dyn CourierTransport>,
        allocator: Box<dyn NumberAllocator>,
    ) -> Self {
        Self {
            id,
            transport,
            allocator,
            queue: Vec::new(),
        }
    }

    pub fn courier_id(&self) -> CourierId {
        self.id
    }

    pub fn transport_description(&self) -> String {
        self.transport.describe()
    }

    pub fn pending(&self) -> &[QueuedConsignment] {
        &self.queue
    }

    pub fn pending_numbers(&self) -> Vec<u64> {
        self.queue.iter().map(|q| q.number).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn is_queued(&self, number: u64) -> bool {
        self.queue.iter().any(|q| q.number == number)
    }

    /// Allocate the next consignment number for this carrier.
    pub fn allocate_next_number(&mut self) -> Result<u64, CourierError> {
        let number = self
            .allocator
            .next_number()
            .map_err(|source| CourierError::Allocation {
                courier: self.id,
                source,
            })?;

        if self.is_queued(number) {
            return Err(CourierError::NumberCollision {
                courier: self.id,
                number,
            });
        }

        debug!(courier = %self.id, number, "allocated consignment number");
        Ok(number)
    }

    /// Append an entry to the pending queue.
    ///
    /// Returns `false` (and leaves the queue untouched) if the number is
    /// already queued; that only happens through a caller bug.
    pub fn enqueue(&mut self, entry: QueuedConsignment) -> bool {
        if self.is_queued(entry.number) {
            error!(
                courier = %self.id,
                number = entry.number,
                consignment_id = %entry.consignment_id,
                "duplicate enqueue ignored"
            );
            return false;
        }
        self.queue.push(entry);
        true
    }

    /// Send the whole queue in one transport call.
    ///
    /// On success the queue is cleared and the flushed entries are returned.
    /// On failure the queue is left exactly as it was.
    pub fn flush(&mut self) -> Result<Vec<QueuedConsignment>, TransportError> {
        if self.queue.is_empty() {
            debug!(courier = %self.id, "nothing queued; flush skipped");
            return Ok(Vec::new());
        }

        let numbers = self.pending_numbers();
        match self.transport.send(&numbers) {
            Ok(()) => {
                info!(
                    courier = %self.id,
                    transport = %self.transport.describe(),
                    count = numbers.len(),
                    "flushed pending consignments"
                );
                Ok(std::mem::take(&mut self.queue))
            }
            Err(e) => {
                warn!(
                    courier = %self.id,
                    transport = %self.transport.describe(),
                    count = numbers.len(),
                    error = %e,
                    "flush failed; numbers stay queued"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::SequentialAllocator;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Capture {
        calls: Mutex<Vec<Vec<u64>>>,
        fail: Mutex<bool>,
    }

    impl CourierTransport for Capture {
        fn send(&self, numbers: &[u64]) -> Result<(), TransportError> {
            if *self.fail.lock().unwrap() {
                return Err(TransportError::Unavailable("down".to_string()));
            }
            self.calls.lock().unwrap().push(numbers.to_vec());
            Ok(())
        }
    }

    fn courier_with(capture: Arc<Capture>) -> Courier {
        Courier::new(
            CourierId::Dpd,
            Box::new(capture),
            Box::new(SequentialAllocator::new(1, 1)),
        )
    }

    fn entry(id: u64, number: u64) -> QueuedConsignment {
        QueuedConsignment {
            consignment_id: ConsignmentId::from_raw(id),
            batch_id: BatchId::from_raw(1),
            number,
        }
    }

    #[test]
    fn allocation_follows_strategy() {
        let mut courier = courier_with(Arc::new(Capture::default()));
        assert_eq!(courier.allocate_next_number().unwrap(), 1);
        assert_eq!(courier.allocate_next_number().unwrap(), 2);
    }

    #[test]
    fn allocation_refuses_number_still_queued() {
        let mut courier = Courier::new(
            CourierId::Ups,
            Box::new(Arc::new(Capture::default())),
            Box::new(|| -> Result<u64, AllocationError> { Ok(7) }),
        );
        assert!(courier.enqueue(entry(1, 7)));
        let err = courier.allocate_next_number().unwrap_err();
        assert_eq!(
            err,
            CourierError::NumberCollision {
                courier: CourierId::Ups,
                number: 7
            }
        );
    }

    #[test]
    fn allocator_failure_is_wrapped() {
        let mut courier = Courier::new(
            CourierId::Dhl,
            Box::new(Arc::new(Capture::default())),
            Box::new(|| -> Result<u64, AllocationError> {
                Err(AllocationError::Unavailable("lookup timed out".to_string()))
            }),
        );
        assert!(matches!(
            courier.allocate_next_number(),
            Err(CourierError::Allocation { courier: CourierId::Dhl, .. })
        ));
    }

    #[test]
    fn duplicate_enqueue_is_ignored() {
        let mut courier = courier_with(Arc::new(Capture::default()));
        assert!(courier.enqueue(entry(1, 10)));
        assert!(!courier.enqueue(entry(2, 10)));
        assert_eq!(courier.pending_numbers(), vec![10]);
    }

    #[test]
    fn successful_flush_sends_everything_and_clears() {
        let capture = Arc::new(Capture::default());
        let mut courier = courier_with(capture.clone());
        courier.enqueue(entry(1, 10));
        courier.enqueue(entry(2, 11));

        let flushed = courier.flush().unwrap();

        assert_eq!(flushed, vec![entry(1, 10), entry(2, 11)]);
        assert!(!courier.has_pending());
        assert_eq!(*capture.calls.lock().unwrap(), vec![vec![10, 11]]);
    }

    #[test]
    fn failed_flush_retains_queue() {
        let capture = Arc::new(Capture::default());
        *capture.fail.lock().unwrap() = true;
        let mut courier = courier_with(capture.clone());
        courier.enqueue(entry(1, 10));
        courier.enqueue(entry(2, 11));

        let err = courier.flush().unwrap_err();

        assert!(matches!(err, TransportError::Unavailable(_)));
        assert_eq!(courier.pending(), &[entry(1, 10), entry(2, 11)]);

        // Recovered transport delivers the same numbers.
        *capture.fail.lock().unwrap() = false;
        assert_eq!(courier.flush().unwrap().len(), 2);
        assert_eq!(*capture.calls.lock().unwrap(), vec![vec![10, 11]]);
    }

    #[test]
    fn empty_flush_does_not_touch_transport() {
        let capture = Arc::new(Capture::default());
        let mut courier = courier_with(capture.clone());
        assert!(courier.flush().unwrap().is_empty());
        assert!(capture.calls.lock().unwrap().is_empty());
    }
}
