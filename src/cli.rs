//! CLI definitions for hadrianus.

use clap::Parser;
use std::path::PathBuf;

use relay_core::config;

#[derive(Parser)]
#[clap(
    name = "hadrianus",
    version,
    about = "Graphite plaintext metrics relay\n\nAccepts `metric_path value timestamp` lines over TCP, suppresses chatty and stale series, and fans the survivors out to one or more downstream Graphite clusters.",
    long_about = None
)]
pub struct Cli {
    /// TCP port to listen on for incoming metrics
    pub listening_port: u16,

    /// Primary cluster destinations (`port`, `:port`, or `host:port`)
    #[clap(required = true)]
    pub destination: Vec<String>,

    /// Initially enable forwarding for newly encountered metric paths
    #[clap(long = "enablenewmetrics")]
    pub enable_new_metrics: bool,

    /// Minimum allowed time interval between incoming metrics in seconds
    #[clap(
        long = "minimumtimeinterval",
        default_value_t = config::DEFAULT_MINIMUM_TIME_INTERVAL
    )]
    pub minimum_time_interval: i64,

    /// Time between statistics messages in seconds
    #[clap(
        long = "statstimegranularity",
        default_value_t = config::DEFAULT_STATS_TIME_GRANULARITY
    )]
    pub stats_time_granularity: i64,

    /// Maximum allowed consecutive identical values before marking a metric
    /// as stale
    #[clap(
        long = "maxdrymessages",
        default_value_t = config::DEFAULT_MAX_CONSECUTIVE_DRY_MESSAGES
    )]
    pub max_dry_messages: u64,

    /// The maximum number of messages that the dry threshold may be
    /// increased to
    #[clap(long = "maxdrylimit", default_value_t = config::DEFAULT_MAX_DRY_LIMIT)]
    pub max_dry_limit: u64,

    /// Time after which stale messages are resent in seconds (0 disables)
    #[clap(
        long = "staleresendinterval",
        default_value_t = config::DEFAULT_STALE_RESEND_INTERVAL
    )]
    pub stale_resend_interval: i64,

    /// Secondary destinations to mirror traffic to (space-separated)
    #[clap(long = "mirrordestination", default_value = "")]
    pub mirror_destination: String,

    /// Tertiary destinations to mirror traffic to (space-separated)
    #[clap(long = "tertiarydestination", default_value = "")]
    pub tertiary_destination: String,

    /// Seconds between cleanup events
    #[clap(
        long = "cleanuptimegranularity",
        default_value_t = config::DEFAULT_CLEANUP_TIME_GRANULARITY
    )]
    pub cleanup_time_granularity: i64,

    /// Maximum time in seconds since a path's last message before cleanup
    /// evicts it
    #[clap(long = "cleanupmaxage", default_value_t = config::DEFAULT_CLEANUP_MAX_AGE)]
    pub cleanup_max_age: i64,

    /// Filename for the override file
    #[clap(long = "override")]
    pub override_file: Option<PathBuf>,
}
