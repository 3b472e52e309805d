use tracing::info;

use consign_core::CourierId;
use consign_courier::{CourierTransport, TransportError};

/// Writes each send to the log and reports success. For dry runs.
#[derive(Debug, Clone, Copy)]
pub struct LogTransport {
    courier: CourierId,
}

impl LogTransport {
    pub fn new(courier: CourierId) -> Self {
        Self { courier }
    }
}

impl CourierTransport for LogTransport {
    fn send(&self, numbers: &[u64]) -> Result<(), TransportError> {
        info!(courier = %self.courier, count = numbers.len(), numbers = ?numbers, "consignment numbers sent");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("log({})", self.courier)
    }
}
