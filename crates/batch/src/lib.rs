//! Batch and consignment lifecycle.
//!
//! A [`Batch`] is one dispatch period's append-only list of [`Consignment`]s.
//! It is created open, accepts consignments until it is closed, and on close
//! pushes every consignment number onto its courier's queue. Both types are
//! built only through named constructors; persisted state round-trips through
//! [`BatchRecord`] and [`ConsignmentRecord`].

pub mod batch;
pub mod consignment;
pub mod error;

pub use batch::{Batch, BatchRecord, BatchStatus};
pub use consignment::{Consignment, ConsignmentDraft, ConsignmentRecord};
pub use error::{BatchError, BatchResult};
