//! Transport abstraction consumed by the replication core.
//!
//! The core needs a datagram transport with two channels: reliable-ordered
//! for control traffic and unreliable-unordered for state and input. Real
//! implementations (ENet-class libraries) are host collaborators; the crate
//! ships an in-memory implementation in [`crate::memory`] for tests and
//! local play.

/// Opaque peer identity assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

/// Wire channel discipline. The numeric value is the on-wire channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    /// In-order, loss-free; connection control and spawn traffic.
    Reliable = 0,
    /// May drop or reorder; input and world-state traffic.
    Unreliable = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport-level session established; protocol handshake follows.
    Connected(PeerId),
    /// Peer gone, whether graceful or timed out.
    Disconnected(PeerId),
    Packet {
        peer: PeerId,
        channel: Channel,
        data: Vec<u8>,
    },
}

/// Polled datagram transport with per-channel delivery guarantees.
///
/// Implementations own packet memory; payloads handed to [`Transport::send`]
/// are copied out before the call returns.
pub trait Transport: Send {
    /// Pump the transport and return pending events in arrival order.
    fn service(&mut self) -> Vec<TransportEvent>;

    fn send(&mut self, peer: PeerId, channel: Channel, data: &[u8]);

    /// Begin a graceful disconnect; the peer observes a
    /// [`TransportEvent::Disconnected`].
    fn disconnect(&mut self, peer: PeerId);

    /// Push any queued outgoing packets onto the wire.
    fn flush(&mut self);
}
