//! Container health: one-shot probes and the periodic monitor that acts on them.

pub mod checker;
pub mod monitor;

pub use checker::{HealthChecker, DEFAULT_PROBE_HOST};
pub use monitor::{HealthMonitor, MonitorConfig};
