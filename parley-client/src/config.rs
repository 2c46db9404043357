use std::time::Duration;

/// Tunables for a thread controller
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncConfig {
    /// Deadline for every call to the backing store
    pub store_timeout: Duration,

    /// Delay before the first reconnection attempt, doubled on each
    /// consecutive failure
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// How long a typing indicator stays up without a refresh
    pub typing_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> SyncConfig {
        SyncConfig {
            store_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            typing_ttl: Duration::from_secs(3),
        }
    }
}

impl SyncConfig {
    pub(crate) fn next_backoff(&self, current: Duration) -> Duration {
        std::cmp::min(current.saturating_mul(2), self.max_backoff)
    }
}
