use serde::{Deserialize, Serialize};

/// Tuning for a [`StreamMultiplexer`](crate::StreamMultiplexer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Staging buffer size for a single upstream read (default: 1024 bytes).
    pub chunk_size: usize,
    /// Pending wakes buffered per fork before further wakes are dropped (default: 1).
    pub notify_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            notify_capacity: 1,
        }
    }
}

impl FanoutConfig {
    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}
