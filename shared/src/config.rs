use std::time::Duration;

pub const DEFAULT_BROADCAST_PERIOD: Duration = Duration::from_millis(33);
pub const DEFAULT_PROBE_PERIOD: Duration = Duration::from_millis(5000);
pub const DEFAULT_EVICTION_THRESHOLD: Duration = Duration::from_millis(10000);
pub const DEFAULT_EVICTION_PERIOD: Duration = Duration::from_millis(10000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// How the server hands out participant identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// Strictly increasing; an identifier is never handed out twice per process.
    #[default]
    Monotonic,
    /// Released identifiers are handed out again, smallest first.
    Reuse,
}

/// Timing and capacity parameters of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Period of the full-state broadcast.
    pub broadcast_period: Duration,
    /// Period of the liveness probe.
    pub probe_period: Duration,
    /// A connection with no liveness reply for longer than this is evicted.
    pub eviction_threshold: Duration,
    /// How often staleness is checked.
    pub eviction_period: Duration,
    /// Upper bound on transport establishment plus the join handshake.
    pub connect_timeout: Duration,
    /// Messages buffered per connection before further sends are dropped.
    pub outbound_capacity: usize,
    pub id_policy: IdPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broadcast_period: DEFAULT_BROADCAST_PERIOD,
            probe_period: DEFAULT_PROBE_PERIOD,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            eviction_period: DEFAULT_EVICTION_PERIOD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            id_policy: IdPolicy::Monotonic,
        }
    }
}
