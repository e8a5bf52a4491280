use memesh_api::ValidationLimits;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct CoreConfig {
    /// Capacity of the client event bus; slow subscribers lag past this.
    pub event_buffer: usize,
    /// Reconnect attempts after the real-time link drops. Restored on every
    /// handshake ack.
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub limits: ValidationLimits,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            reconnect_attempts: 1,
            reconnect_delay_ms: 500,
            limits: ValidationLimits::default(),
        }
    }
}
