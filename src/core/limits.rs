//! Runtime safety limits (normative defaults).

use serde::{Deserialize, Serialize};

/// Knobs bounding subscriber counts, buffer sizes and resolution work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_bus_subscribers: usize,
    pub max_live_queries: usize,
    pub default_stream_buffer_events: usize,
    pub max_ops_per_txn: usize,
    pub max_resolution_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_bus_subscribers: 256,
            max_live_queries: 4_096,
            default_stream_buffer_events: 64,
            max_ops_per_txn: 10_000,
            max_resolution_depth: 16,
        }
    }
}
