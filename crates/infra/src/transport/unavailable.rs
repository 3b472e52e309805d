use consign_courier::{CourierTransport, TransportError};

/// A transport that always fails, for couriers that are switched off.
#[derive(Debug, Clone)]
pub struct UnavailableTransport {
    reason: String,
}

impl UnavailableTransport {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl Default for UnavailableTransport {
    fn default() -> Self {
        Self::new("courier disabled")
    }
}

impl CourierTransport for UnavailableTransport {
    fn send(&self, _numbers: &[u64]) -> Result<(), TransportError> {
        Err(TransportError::Unavailable(self.reason.clone()))
    }

    fn describe(&self) -> String {
        "unavailable".to_string()
    }
}
