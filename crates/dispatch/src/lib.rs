//! Dispatch coordination: the single open batch, courier selection and
//! batch close.
//!
//! The [`DispatchCoordinator`] owns the current-batch slot and the courier
//! registry. Storage, courier selection and carrier wiring are reached
//! through the traits in [`ports`], passed in at construction.

pub mod coordinator;
pub mod error;
pub mod ports;
pub mod report;

pub use coordinator::{CoordinatorConfig, DispatchCoordinator};
pub use error::{DispatchError, DispatchResult};
pub use ports::{CarrierDirectory, CarrierError, CourierSelector, DispatchRepository, RepositoryError};
pub use report::{CloseReport, CourierOutcome, FlushReport};
