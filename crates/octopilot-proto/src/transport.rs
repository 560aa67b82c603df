//! ROUTER/DEALER transport: one ROUTER endpoint on the dispatcher, one
//! DEALER endpoint per agent, each carrying a peer identity string.

use crate::error::TransportError;
use parking_lot::Mutex;

const LINGER_MS: i32 = 100;

/// The dispatcher's single ROUTER socket. Sends are serialized behind a
/// lock shared with the heartbeat timer thread; receives are only ever
/// performed from the main thread, so no receive lock is needed.
pub struct DispatcherTransport {
    _ctx: zmq::Context,
    router: Mutex<zmq::Socket>,
}

impl DispatcherTransport {
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let ctx = zmq::Context::new();
        let router = ctx
            .socket(zmq::ROUTER)
            .map_err(|e| TransportError::Bind(format!("tcp://*:{port}"), e.to_string()))?;
        router
            .set_linger(LINGER_MS)
            .map_err(|e| TransportError::Bind(format!("tcp://*:{port}"), e.to_string()))?;
        let endpoint = format!("tcp://*:{port}");
        router
            .bind(&endpoint)
            .map_err(|e| TransportError::Bind(endpoint.clone(), e.to_string()))?;
        Ok(DispatcherTransport {
            _ctx: ctx,
            router: Mutex::new(router),
        })
    }

    /// Send `payload` to the peer identified by `identity`. Every outbound
    /// frame is tagged with a peer identity so the receiving DEALER can be
    /// addressed specifically.
    pub fn send_to(&self, identity: &str, payload: &str) -> Result<(), TransportError> {
        let router = self.router.lock();
        router
            .send_multipart([identity.as_bytes(), payload.as_bytes()], 0)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    pub fn broadcast(&self, identities: &[String], payload: &str) -> Result<(), TransportError> {
        for identity in identities {
            self.send_to(identity, payload)?;
        }
        Ok(())
    }

    /// Non-blocking poll with a bounded timeout, returning the sender's
    /// identity and payload if a message arrived. The control loop polls
    /// with a short timeout and drives at most one receive per
    /// iteration.
    pub fn recv_timeout(&self, timeout_ms: i64) -> Result<Option<(String, String)>, TransportError> {
        let router = self.router.lock();
        let mut items = [router.as_poll_item(zmq::POLLIN)];
        let n = zmq::poll(&mut items, timeout_ms).map_err(|e| TransportError::Poll(e.to_string()))?;
        if n == 0 || !items[0].is_readable() {
            return Ok(None);
        }
        let parts = router
            .recv_multipart(0)
            .map_err(|e| TransportError::Recv(e.to_string()))?;
        if parts.len() < 2 {
            return Ok(None);
        }
        let identity = String::from_utf8_lossy(&parts[0]).into_owned();
        let payload = String::from_utf8_lossy(&parts[1]).into_owned();
        Ok(Some((identity, payload)))
    }
}

/// An agent's single DEALER socket, bound to its hostname identity.
pub struct AgentTransport {
    _ctx: zmq::Context,
    dealer: zmq::Socket,
}

impl AgentTransport {
    pub fn connect(dispatcher_ip: &str, port: u16, identity: &str) -> Result<Self, TransportError> {
        let ctx = zmq::Context::new();
        let dealer = ctx.socket(zmq::DEALER).map_err(|e| {
            TransportError::Connect(format!("tcp://{dispatcher_ip}:{port}"), e.to_string())
        })?;
        dealer
            .set_identity(identity.as_bytes())
            .map_err(|e| TransportError::Connect(identity.to_owned(), e.to_string()))?;
        dealer
            .set_linger(LINGER_MS)
            .map_err(|e| TransportError::Connect(identity.to_owned(), e.to_string()))?;
        let endpoint = format!("tcp://{dispatcher_ip}:{port}");
        dealer
            .connect(&endpoint)
            .map_err(|e| TransportError::Connect(endpoint.clone(), e.to_string()))?;
        Ok(AgentTransport {
            _ctx: ctx,
            dealer,
        })
    }

    pub fn send(&self, payload: &str) -> Result<(), TransportError> {
        self.dealer
            .send(payload, 0)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    pub fn recv_timeout(&self, timeout_ms: i64) -> Result<Option<String>, TransportError> {
        let mut items = [self.dealer.as_poll_item(zmq::POLLIN)];
        let n = zmq::poll(&mut items, timeout_ms).map_err(|e| TransportError::Poll(e.to_string()))?;
        if n == 0 || !items[0].is_readable() {
            return Ok(None);
        }
        let payload = self
            .dealer
            .recv_string(0)
            .map_err(|e| TransportError::Recv(e.to_string()))?
            .map_err(|_| TransportError::Recv("non-utf8 payload".to_owned()))?;
        Ok(Some(payload))
    }
}
