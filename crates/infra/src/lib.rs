//! Reference adapters for the dispatch ports, plus configuration loading.
//!
//! Everything here is synchronous and std-only at the I/O layer; swap in a
//! real carrier client by implementing `CourierTransport`.

pub mod carriers;
pub mod config;
pub mod repository;
pub mod selection;
pub mod transport;

pub use carriers::ConfiguredCarriers;
pub use config::{AllocatorSpec, AppConfig, CarrierSpec, CarriersConfig, ConfigError, SelectionConfig, TransportSpec};
pub use repository::{InMemoryDispatchRepository, JsonFileDispatchRepository};
pub use selection::{WeightBand, WeightBandSelector};
pub use transport::{FileDropTransport, LogTransport, RecordingTransport, UnavailableTransport};
