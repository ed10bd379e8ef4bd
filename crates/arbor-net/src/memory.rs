//! In-memory transport: lossless, ordered delivery on both channels over
//! shared queues. Backs the protocol tests and local single-process play.

use crate::transport::{Channel, PeerId, Transport, TransportEvent};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct HubState {
    queues: HashMap<u64, VecDeque<TransportEvent>>,
    next_endpoint: u64,
    /// Endpoints dropping unreliable traffic, for loss-behavior tests.
    lossy: HashMap<u64, bool>,
}

/// Shared switchboard connecting one server endpoint with any number of
/// client endpoints.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<HubState>>,
    server_endpoint: u64,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        queues.insert(1, VecDeque::new());
        Self {
            hub: Arc::new(Mutex::new(HubState {
                queues,
                next_endpoint: 2,
                lossy: HashMap::new(),
            })),
            server_endpoint: 1,
        }
    }

    /// The listening end. Call once.
    pub fn server_transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.hub.clone(),
            endpoint: self.server_endpoint,
        }
    }

    /// Open a new client endpoint; both sides observe the connect.
    pub fn connect_client(&self) -> MemoryTransport {
        let mut hub = self.hub.lock();
        let endpoint = hub.next_endpoint;
        hub.next_endpoint += 1;
        hub.queues.insert(endpoint, VecDeque::new());

        let server = self.server_endpoint;
        if let Some(queue) = hub.queues.get_mut(&server) {
            queue.push_back(TransportEvent::Connected(PeerId(endpoint)));
        }
        if let Some(queue) = hub.queues.get_mut(&endpoint) {
            queue.push_back(TransportEvent::Connected(PeerId(server)));
        }

        MemoryTransport {
            hub: self.hub.clone(),
            endpoint,
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint on a [`MemoryNetwork`]. Clones share the endpoint, which
/// lets tests keep a control handle after boxing the transport.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Mutex<HubState>>,
    endpoint: u64,
}

impl MemoryTransport {
    /// Drop all unreliable sends from this endpoint while set. The reliable
    /// channel is unaffected.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.hub.lock().lossy.insert(self.endpoint, drop);
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId(self.endpoint)
    }
}

impl Transport for MemoryTransport {
    fn service(&mut self) -> Vec<TransportEvent> {
        let mut hub = self.hub.lock();
        match hub.queues.get_mut(&self.endpoint) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn send(&mut self, peer: PeerId, channel: Channel, data: &[u8]) {
        let mut hub = self.hub.lock();
        if channel == Channel::Unreliable && hub.lossy.get(&self.endpoint).copied().unwrap_or(false)
        {
            return;
        }
        let from = PeerId(self.endpoint);
        if let Some(queue) = hub.queues.get_mut(&peer.0) {
            queue.push_back(TransportEvent::Packet {
                peer: from,
                channel,
                data: data.to_vec(),
            });
        } else {
            log::debug!("memory transport: send to unknown peer {peer:?} dropped");
        }
    }

    fn disconnect(&mut self, peer: PeerId) {
        let mut hub = self.hub.lock();
        let from = PeerId(self.endpoint);
        if let Some(queue) = hub.queues.get_mut(&peer.0) {
            queue.push_back(TransportEvent::Disconnected(from));
        }
        // The initiator observes its own teardown as well, matching
        // datagram libraries that confirm graceful disconnects.
        if let Some(queue) = hub.queues.get_mut(&self.endpoint) {
            queue.push_back(TransportEvent::Disconnected(peer));
        }
    }

    fn flush(&mut self) {
        // Delivery is immediate; nothing to do.
    }
}
