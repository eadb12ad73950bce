//! Connectivity state shared by the whole process.

mod monitor;
mod probe;

pub use monitor::{
  ConnectivityChange, ConnectivityMonitor, ConnectivitySnapshot, ConnectivityState, MonitorConfig,
  OfflineReason, Subscription,
};
pub use probe::Prober;
