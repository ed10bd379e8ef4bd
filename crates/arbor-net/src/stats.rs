//! Plain counters for traffic accounting.

/// Per-endpoint network statistics. Malformed packets are dropped silently
/// on the wire path; `parse_errors` is the only trace they leave.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub parse_errors: u64,
    pub ping_ms: f32,
}

impl NetworkStats {
    pub fn record_send(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_receive(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_parse_error(&mut self) {
        self.parse_errors += 1;
    }

    pub fn reset_counters(&mut self) {
        let ping_ms = self.ping_ms;
        *self = Self::default();
        self.ping_ms = ping_ms;
    }
}
