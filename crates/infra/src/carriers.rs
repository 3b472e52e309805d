use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use consign_core::CourierId;
use consign_courier::{CourierTransport, NumberAllocator, PrefixedAllocator, SequentialAllocator};
use consign_dispatch::{CarrierDirectory, CarrierError};

use crate::config::{AllocatorSpec, CarriersConfig, TransportSpec};
use crate::selection::WeightBandSelector;
use crate::transport::{FileDropTransport, LogTransport, RecordingTransport, UnavailableTransport};

/// `CarrierDirectory` driven by a [`CarriersConfig`].
///
/// `memory` transports are created once per courier and shared, so callers can
/// inspect what was sent through [`ConfiguredCarriers::memory_transport`].
#[derive(Debug)]
pub struct ConfiguredCarriers {
    config: CarriersConfig,
    memory: Mutex<BTreeMap<CourierId, Arc<RecordingTransport>>>,
}

impl ConfiguredCarriers {
    pub fn new(config: CarriersConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &CarriersConfig {
        &self.config
    }

    pub fn selector(&self) -> WeightBandSelector {
        WeightBandSelector::from_config(&self.config.selection)
    }

    /// The shared recording transport for `courier`, created on first use.
    pub fn memory_transport(&self, courier: CourierId) -> Option<Arc<RecordingTransport>> {
        let mut memory = self.memory.lock().ok()?;
        Some(memory.entry(courier).or_default().clone())
    }
}

impl CarrierDirectory for ConfiguredCarriers {
    fn resolve_transport(&self, courier: CourierId) -> Result<Box<dyn CourierTransport>, CarrierError> {
        let spec = self.config.spec(courier).ok_or(CarrierError::NotConfigured(courier))?;
        let transport: Box<dyn CourierTransport> = match &spec.transport {
            TransportSpec::Log => Box::new(LogTransport::new(courier)),
            TransportSpec::Memory => Box::new(self.memory_transport(courier).ok_or_else(|| CarrierError::Invalid {
                courier,
                reason: "memory transport registry poisoned".to_string(),
            })?),
            TransportSpec::FileDrop { dir } => Box::new(FileDropTransport::new(courier, dir.clone())),
            TransportSpec::Unavailable { reason } => Box::new(match reason {
                Some(r) => UnavailableTransport::new(r.clone()),
                None => UnavailableTransport::default(),
            }),
        };
        Ok(transport)
    }

    fn resolve_allocator(
        &self,
        courier: CourierId,
        highest_issued: Option<u64>,
    ) -> Result<Box<dyn NumberAllocator>, CarrierError> {
        let spec = self.config.spec(courier).ok_or(CarrierError::NotConfigured(courier))?;
        let allocator: Box<dyn NumberAllocator> = match spec.allocator {
            AllocatorSpec::Sequential { start, step } => {
                Box::new(SequentialAllocator::resume_after(highest_issued, start, step))
            }
            AllocatorSpec::Prefixed { prefix, width } => Box::new(
                PrefixedAllocator::resume_after(prefix, width, highest_issued).map_err(|e| CarrierError::Invalid {
                    courier,
                    reason: e.to_string(),
                })?,
            ),
        };
        Ok(allocator)
    }
}
