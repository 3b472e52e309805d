//! Courier queuing and flush protocol.
//!
//! A [`Courier`] owns the pending-send queue for one carrier, allocates
//! consignment numbers through a pluggable [`NumberAllocator`], and flushes
//! its queue through a [`CourierTransport`] in one call. Couriers are cached in
//! a [`CourierRegistry`] keyed by [`consign_core::CourierId`].

pub mod allocator;
pub mod courier;
pub mod registry;
pub mod transport;

pub use allocator::{AllocationError, NumberAllocator, PrefixedAllocator, SequentialAllocator};
pub use courier::{Courier, CourierError, QueuedConsignment};
pub use registry::{CourierRegistry, FlushAttempt, FlushMode};
pub use transport::{CourierTransport, TransportError};
