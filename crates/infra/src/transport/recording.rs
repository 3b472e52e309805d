use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use consign_courier::{CourierTransport, TransportError};

/// Test transport that records every call and can be switched to fail.
///
/// Failed calls are recorded too, so tests can tell "not attempted" from
/// "attempted and refused".
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Vec<u64>>>,
    delivered: Mutex<Vec<Vec<u64>>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let t = Self::default();
        t.set_failing(true);
        t
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every `send` argument, successful or not.
    pub fn calls(&self) -> Vec<Vec<u64>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Arguments of the successful sends only.
    pub fn delivered(&self) -> Vec<Vec<u64>> {
        self.delivered.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn delivered_numbers(&self) -> Vec<u64> {
        self.delivered().into_iter().flatten().collect()
    }
}

impl CourierTransport for RecordingTransport {
    fn send(&self, numbers: &[u64]) -> Result<(), TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(numbers.to_vec());
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("recording transport set to fail".to_string()));
        }
        self.delivered
            .lock()
            .map_err(|_| TransportError::Io("recording lock poisoned".to_string()))?
            .push(numbers.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_calls_are_recorded_but_not_delivered() {
        let t = RecordingTransport::failing();
        assert!(t.send(&[1, 2]).is_err());
        t.set_failing(false);
        t.send(&[1, 2]).unwrap();

        assert_eq!(t.calls(), vec![vec![1, 2], vec![1, 2]]);
        assert_eq!(t.delivered_numbers(), vec![1, 2]);
    }
}
