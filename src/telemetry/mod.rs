//! Telemetry module for logging and metrics.
//!
//! Provides:
//! - Logging configuration and initialization
//! - Counters for control-plane activity

mod logging;
mod metrics;

pub(crate) use logging::is_known_level;
pub use logging::{LogConfig, init_logging};
pub use metrics::{Counter, MetricsRegistry, SwitchStats};
