//! Runtime tunables and their compiled-in defaults.

pub const DEFAULT_MINIMUM_TIME_INTERVAL: i64 = 14;
pub const DEFAULT_STATS_TIME_GRANULARITY: i64 = 60;
pub const DEFAULT_CLEANUP_TIME_GRANULARITY: i64 = 86401;
pub const DEFAULT_CLEANUP_MAX_AGE: i64 = 86400;
/// Consecutive identical values before a metric path is marked stale.
pub const DEFAULT_MAX_CONSECUTIVE_DRY_MESSAGES: u64 = 120;
/// The maximum number of messages that the dry threshold may be widened to.
pub const DEFAULT_MAX_DRY_LIMIT: u64 = 21600;
pub const DEFAULT_STALE_RESEND_INTERVAL: i64 = 0;
pub const DEFAULT_INITIAL_METRICS_ENABLED: bool = false;

/// Disable delay of sending successive small packets on egress sockets.
pub const TCP_NO_DELAY: bool = false;

/// All knobs the relay accepts, CLI-settable unless noted otherwise.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Whether forwarding starts enabled for newly encountered paths.
    pub initial_metrics_enabled: bool,
    /// Minimum seconds between forwarded samples for one path.
    pub minimum_time_interval: i64,
    /// Seconds between internal statistics emissions.
    pub stats_time_granularity: i64,
    /// Consecutive identical values before a path is marked stale.
    pub max_consecutive_dry_messages: u64,
    /// Upper bound for the adaptive dry threshold.
    pub max_dry_limit: u64,
    /// When positive, seconds after which a suppressed path is resent anyway.
    pub stale_resend_interval: i64,
    /// Seconds between cleanup scans.
    pub cleanup_time_granularity: i64,
    /// Seconds since a path's last sample before the cleanup scan evicts it.
    pub cleanup_max_age: i64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            initial_metrics_enabled: DEFAULT_INITIAL_METRICS_ENABLED,
            minimum_time_interval: DEFAULT_MINIMUM_TIME_INTERVAL,
            stats_time_granularity: DEFAULT_STATS_TIME_GRANULARITY,
            max_consecutive_dry_messages: DEFAULT_MAX_CONSECUTIVE_DRY_MESSAGES,
            max_dry_limit: DEFAULT_MAX_DRY_LIMIT,
            stale_resend_interval: DEFAULT_STALE_RESEND_INTERVAL,
            cleanup_time_granularity: DEFAULT_CLEANUP_TIME_GRANULARITY,
            cleanup_max_age: DEFAULT_CLEANUP_MAX_AGE,
        }
    }
}
