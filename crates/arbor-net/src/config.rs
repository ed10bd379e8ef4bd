//! Replication tunables.

use crate::protocol::DEFAULT_PORT;
use std::time::Duration;

/// Knobs for both endpoints. Defaults reproduce the engine's shipped
/// behavior: 20 Hz state broadcast at a 60 Hz sim tick, 64-deep snapshot
/// history pruned 32 ticks behind the ack.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub port: u16,
    pub max_clients: u32,
    /// Emit one WORLD_STATE_UPDATE every this many server ticks.
    pub state_update_divisor: u32,
    pub snapshot_history_cap: usize,
    /// Snapshots older than `ack - window` are pruned.
    pub ack_prune_window: u32,
    /// Client-side wait for CONNECT_ACCEPT before giving up.
    pub connect_timeout: Duration,
    /// Minimum spacing between INPUT_COMMAND sends (seconds).
    pub input_send_interval: f32,
    /// Spacing between PINGs (seconds).
    pub ping_interval: f32,
    /// How long a shutting-down server services the transport to drain
    /// outgoing disconnects.
    pub shutdown_drain: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: 32,
            state_update_divisor: 3,
            snapshot_history_cap: 64,
            ack_prune_window: 32,
            connect_timeout: Duration::from_secs(5),
            input_send_interval: 1.0 / 60.0,
            ping_interval: 1.0,
            shutdown_drain: Duration::from_millis(100),
        }
    }
}
