//! Protocol parameters shared by every component of a node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable DHT parameters.
///
/// Every field has a protocol default; configuration files only need to name
/// the fields they change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Bucket size and target replication factor.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Lookup parallelism per round.
    #[serde(default = "default_alpha")]
    pub alpha: usize,
    /// Cache-tier capacity of the value store, in items.
    #[serde(default = "default_store_size")]
    pub store_size: usize,
    /// Age limit for stored values, in seconds. Applies to both tiers.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Maximum live peer sessions held by the connection broker.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// In-flight outbound requests per peer session.
    #[serde(default = "default_req_buffer")]
    pub req_buffer: usize,
    /// Interval of the periodic self-refresh, in seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Deadline for a single outbound request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Whether the designated primary re-broadcasts stored values to the
    /// remaining closest peers. Off until replica deduplication lands.
    #[serde(default)]
    pub broadcast_replicas: bool,
}

fn default_k() -> usize {
    20
}

fn default_alpha() -> usize {
    2
}

fn default_store_size() -> usize {
    100
}

fn default_max_age_secs() -> u64 {
    86_400
}

fn default_max_connections() -> usize {
    50
}

fn default_req_buffer() -> usize {
    10
}

fn default_refresh_interval_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            alpha: default_alpha(),
            store_size: default_store_size(),
            max_age_secs: default_max_age_secs(),
            max_connections: default_max_connections(),
            req_buffer: default_req_buffer(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            broadcast_replicas: false,
        }
    }
}

impl DhtConfig {
    /// Value age limit as a [`Duration`].
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Self-refresh interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Per-request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
