//! Per-courier flush results returned to the caller.

use serde::Serialize;

use consign_core::{BatchId, CourierId};
use consign_courier::TransportError;

/// What happened to one courier's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CourierOutcome {
    Flushed {
        courier: CourierId,
        numbers: Vec<u64>,
    },
    /// The transport failed; `pending` is everything still queued for a retry.
    Failed {
        courier: CourierId,
        error: TransportError,
        pending: Vec<u64>,
    },
}

impl CourierOutcome {
    pub fn courier(&self) -> CourierId {
        match self {
            CourierOutcome::Flushed { courier, .. } | CourierOutcome::Failed { courier, .. } => *courier,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CourierOutcome::Failed { .. })
    }
}

/// Result of flushing a set of couriers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub outcomes: Vec<CourierOutcome>,
    /// Consignments whose `sent` flag flipped as a result of this flush.
    pub marked_sent: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        !self.outcomes.iter().any(CourierOutcome::is_failure)
    }

    pub fn failed_couriers(&self) -> Vec<CourierId> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(CourierOutcome::courier)
            .collect()
    }

    pub fn outcome(&self, courier: CourierId) -> Option<&CourierOutcome> {
        self.outcomes.iter().find(|o| o.courier() == courier)
    }
}

/// Result of closing a batch.
///
/// The batch is closed even when some couriers failed; those couriers keep
/// their numbers queued and are listed in `failed_couriers()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub batch_id: BatchId,
    pub consignments: usize,
    pub queued: usize,
    pub flush: FlushReport,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.flush.is_clean()
    }

    pub fn failed_couriers(&self) -> Vec<CourierId> {
        self.flush.failed_couriers()
    }
}
