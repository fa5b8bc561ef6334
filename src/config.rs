//! Tunables shared by the wire client and the engines.

use std::time::Duration;

/// Default rebalance threshold, in percent of a node's slot count.
pub const REBALANCE_DEFAULT_THRESHOLD: f64 = 2.0;

/// Configuration for talking to cluster nodes and moving slots.
#[derive(Clone, Debug)]
pub struct TribConfig {
    /// Deadline for opening a TCP connection to a node.
    pub connect_timeout: Duration,
    /// Deadline for a single command round trip.
    pub command_timeout: Duration,
    /// Maximum number of MOVED redirects followed for one command.
    pub max_redirects: usize,
    /// Page size for `CLUSTER GETKEYSINSLOT` during migration.
    pub keys_batch_size: u64,
    /// Timeout passed to `MIGRATE`, in milliseconds.
    pub migrate_timeout_ms: u64,
    /// Database index passed to `MIGRATE`.
    pub migrate_db: u32,
    /// Delay between two convergence probes while waiting for a join.
    pub join_poll_interval: Duration,
    /// Give up waiting for convergence after this long. `None` waits forever.
    pub join_timeout: Option<Duration>,
}

impl Default for TribConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(60),
            max_redirects: 16,
            keys_batch_size: 10,
            migrate_timeout_ms: 10_000,
            migrate_db: 0,
            join_poll_interval: Duration::from_secs(1),
            join_timeout: None,
        }
    }
}

impl TribConfig {
    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the redirect limit.
    pub fn with_max_redirects(mut self, limit: usize) -> Self {
        self.max_redirects = limit;
        self
    }

    /// Set the key page size used while draining a slot.
    pub fn with_keys_batch_size(mut self, size: u64) -> Self {
        self.keys_batch_size = size.max(1);
        self
    }

    /// Set the MIGRATE timeout.
    pub fn with_migrate_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.migrate_timeout_ms = timeout_ms;
        self
    }

    /// Set the join polling interval.
    pub fn with_join_poll_interval(mut self, interval: Duration) -> Self {
        self.join_poll_interval = interval;
        self
    }

    /// Bound the join wait.
    pub fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }
}
