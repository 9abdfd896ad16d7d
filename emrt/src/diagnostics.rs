//! Diagnostics: per-task profiling and system health classification

mod health;
mod profiler;

pub use health::{HealthMonitor, HealthThresholds, SystemHealth, TaskHealth};
pub use profiler::{Profiler, TaskMetrics};
