pub mod config;
pub mod egress;
pub mod filter;
pub mod ingress;
pub mod message;
pub mod overrides;
pub mod pipeline;
pub mod probes;
pub mod queue;
pub mod stats;

pub use config::RelaySettings;
pub use egress::{parse_cluster, Destination, DestinationError};
pub use filter::MetricFilter;
pub use message::{parse_line, MetricMessage, ParseError};
pub use overrides::{load_override_file, OverrideError, OverrideRule, OverrideSet};
pub use pipeline::FatalError;
pub use queue::{FlowControl, IngressSender, PoolSender};
pub use stats::{Counter, Gauge, Stats, StatsEmitter};
