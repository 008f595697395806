//! Cluster configuration.

use std::time::Duration;
use tally_sync::RetryPolicy;

/// Tunables shared by nodes and the coordinator.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// How often each node runs an anti-entropy round.
    pub sync_interval: Duration,
    /// Backoff policy for peer calls.
    pub retry: RetryPolicy,
    /// Additional distinct physical nodes holding each key.
    pub replication_factor: usize,
    /// Virtual ring entries per physical node.
    pub virtual_nodes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            replication_factor: 2,
            virtual_nodes: 3,
        }
    }
}

/// Builder for cluster configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.config.replication_factor = factor;
        self
    }

    pub fn virtual_nodes(mut self, count: usize) -> Self {
        self.config.virtual_nodes = count;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
