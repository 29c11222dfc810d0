//! Reference adapter over a mixnet client.
//!
//! The client itself lives outside this crate. It only has to push raw
//! payloads out and feed whatever its pickup loop receives into
//! [`MixnetAdapter::deliver`].

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{check_size, ReceiveHandler, Transport, TransportError};

/// Minimal surface the adapter needs from a mixnet client.
pub trait MixnetClient: Send + Sync {
    fn send_raw(&self, payload: &[u8]) -> Result<(), String>;

    fn connect(&self) -> Result<(), String> {
        Ok(())
    }

    fn disconnect(&self) {}
}

pub struct MixnetAdapter<C: MixnetClient> {
    client: C,
    max_envelope_bytes: usize,
    handler: Mutex<Option<ReceiveHandler>>,
    started: Mutex<bool>,
}

impl<C: MixnetClient> MixnetAdapter<C> {
    pub fn new(client: C, max_envelope_bytes: usize) -> Self {
        Self {
            client,
            max_envelope_bytes,
            handler: Mutex::new(None),
            started: Mutex::new(false),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Route one inbound payload to the handler. Payloads arriving while
    /// stopped are dropped.
    pub fn deliver(&self, raw: &[u8]) -> crate::Result<()> {
        if !*self.started.lock() {
            debug!(bytes = raw.len(), "mixnet payload dropped while stopped");
            return Ok(());
        }
        let handler = self
            .handler
            .lock()
            .clone()
            .ok_or(TransportError::NoReceiveHandler)?;
        let outcome = handler(raw);
        if let Err(err) = &outcome {
            warn!(bytes = raw.len(), error = %err, "inbound mixnet payload rejected");
        }
        outcome
    }
}

impl<C: MixnetClient> Transport for MixnetAdapter<C> {
    fn send(&self, envelope: &[u8]) -> Result<(), TransportError> {
        check_size(envelope, self.max_envelope_bytes)?;
        if !*self.started.lock() {
            return Err(TransportError::NotStarted);
        }
        self.client.send_raw(envelope).map_err(TransportError::Mixnet)
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) -> Result<(), TransportError> {
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn start(&self) -> Result<(), TransportError> {
        let mut started = self.started.lock();
        if *started {
            return Err(TransportError::AlreadyStarted);
        }
        if self.handler.lock().is_none() {
            return Err(TransportError::NoReceiveHandler);
        }
        self.client.connect().map_err(TransportError::Mixnet)?;
        *started = true;
        debug!("mixnet adapter started");
        Ok(())
    }

    fn stop(&self) -> Result<(), TransportError> {
        let mut started = self.started.lock();
        if *started {
            self.client.disconnect();
            *started = false;
            debug!("mixnet adapter stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeClient {
        sent: Mutex<Vec<Vec<u8>>>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        fail: bool,
    }

    impl MixnetClient for FakeClient {
        fn send_raw(&self, payload: &[u8]) -> Result<(), String> {
            if self.fail {
                return Err("gateway unreachable".into());
            }
            self.sent.lock().push(payload.to_vec());
            Ok(())
        }

        fn connect(&self) -> Result<(), String> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn started(client: FakeClient, max: usize) -> (MixnetAdapter<FakeClient>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let adapter = MixnetAdapter::new(client, max);
        let h = Arc::clone(&hits);
        adapter
            .set_receive_handler(Arc::new(move |_: &[u8]| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        adapter.start().unwrap();
        (adapter, hits)
    }

    #[test]
    fn oversized_payload_never_reaches_the_client() {
        let (adapter, _) = started(FakeClient::default(), 4);
        assert!(matches!(
            adapter.send(b"12345"),
            Err(TransportError::EnvelopeTooLarge { size: 5, max: 4 })
        ));
        adapter.send(b"1234").unwrap();
        assert_eq!(adapter.client().sent.lock().len(), 1);
    }

    #[test]
    fn client_failures_surface_as_mixnet_errors() {
        let client = FakeClient {
            fail: true,
            ..FakeClient::default()
        };
        let (adapter, _) = started(client, 64);
        assert!(matches!(adapter.send(b"x"), Err(TransportError::Mixnet(_))));
    }

    #[test]
    fn lifecycle_matches_the_transport_contract() {
        let adapter = MixnetAdapter::new(FakeClient::default(), 64);
        assert!(matches!(adapter.start(), Err(TransportError::NoReceiveHandler)));
        adapter
            .set_receive_handler(Arc::new(|_: &[u8]| Ok(())))
            .unwrap();
        adapter.start().unwrap();
        assert!(matches!(adapter.start(), Err(TransportError::AlreadyStarted)));
        adapter.stop().unwrap();
        adapter.stop().unwrap();
        assert_eq!(adapter.client().connects.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.client().disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deliver_routes_only_while_started() {
        let (adapter, hits) = started(FakeClient::default(), 64);
        adapter.deliver(b"one").unwrap();
        adapter.stop().unwrap();
        adapter.deliver(b"two").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
