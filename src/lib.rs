//! powernap - run an action once a machine has been idle long enough.
//!
//! A set of monitors is observed once per interval. Each keeps an absence
//! counter; when every counter has passed the threshold the configured action
//! runs and the counters start over.

pub mod absence;
pub mod action;
pub mod aggregator;
pub mod config;
pub mod interfaces;
pub mod lifecycle;
pub mod monitor;
pub mod snapshot;

pub use aggregator::IdleAggregator;
pub use aggregator::TickOutcome;
pub use config::Config;
pub use config::IdleConfig;
pub use lifecycle::LockToken;
pub use monitor::Monitor;
