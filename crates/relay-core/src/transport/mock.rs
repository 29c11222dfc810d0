use parking_lot::Mutex;
use tracing::debug;

use super::{check_size, ReceiveHandler, Transport, TransportError};
use crate::config::DEFAULT_MAX_ENVELOPE_BYTES;

/// In-memory transport. Keeps every envelope it was asked to send and lets
/// tests push inbound bytes through the installed handler.
pub struct MockTransport {
    max_envelope_bytes: usize,
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    handler: Option<ReceiveHandler>,
    started: bool,
    sent: Vec<Vec<u8>>,
}

impl MockTransport {
    pub fn new(max_envelope_bytes: usize) -> Self {
        Self {
            max_envelope_bytes,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Deliver `raw` as if it arrived from the network.
    pub fn inject(&self, raw: &[u8]) -> crate::Result<()> {
        let handler = {
            let state = self.state.lock();
            if !state.started {
                return Err(TransportError::NotStarted.into());
            }
            state.handler.clone().ok_or(TransportError::NoReceiveHandler)?
        };
        handler(raw)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENVELOPE_BYTES)
    }
}

impl Transport for MockTransport {
    fn send(&self, envelope: &[u8]) -> Result<(), TransportError> {
        check_size(envelope, self.max_envelope_bytes)?;
        self.state.lock().sent.push(envelope.to_vec());
        debug!(bytes = envelope.len(), "mock transport accepted envelope");
        Ok(())
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) -> Result<(), TransportError> {
        self.state.lock().handler = Some(handler);
        Ok(())
    }

    fn start(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(TransportError::AlreadyStarted);
        }
        if state.handler.is_none() {
            return Err(TransportError::NoReceiveHandler);
        }
        state.started = true;
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        self.state.lock().started = false;
        Ok(())
    }
}
