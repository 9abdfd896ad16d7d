//! Task and system health classification

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::core::TaskId;
use crate::platform::Platform;

use super::profiler::TaskMetrics;

/// A task is unresponsive when its metrics have not been refreshed for
/// this long.
const UNRESPONSIVE_AFTER_US: u64 = 30_000_000;
/// Latency above this marks a task degraded
const LATENCY_WARNING_US: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskHealth {
    Unknown,
    Healthy,
    Warning,
    Critical,
    Unresponsive,
}

/// Warning/critical thresholds for system-level classification, percent
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HealthThresholds {
    pub cpu_warning: f32,
    pub cpu_critical: f32,
    pub memory_warning: f32,
    pub memory_critical: f32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 80.0,
            cpu_critical: 95.0,
            memory_warning: 80.0,
            memory_critical: 95.0,
        }
    }
}

/// System-wide health snapshot
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemHealth {
    pub tasks_total: u8,
    pub tasks_running: u8,
    pub tasks_suspended: u8,
    pub tasks_faulted: u8,

    pub messages_dropped_total: u32,
    pub queue_utilization_percent: f32,

    pub cpu_utilization_percent: f32,
    pub memory_utilization_percent: f32,

    pub uptime_ms: u64,
    pub overall: TaskHealth,
}

struct HealthEntry {
    task: TaskId,
    status: TaskHealth,
    last_seen_us: u64,
    error_count: u32,
}

struct HealthInner<const MAX_TASKS: usize> {
    entries: Vec<HealthEntry, MAX_TASKS>,
}

pub struct HealthMonitor<M: RawMutex, const MAX_TASKS: usize> {
    platform: &'static dyn Platform,
    thresholds: HealthThresholds,
    inner: Mutex<M, RefCell<HealthInner<MAX_TASKS>>>,
}

impl<M: RawMutex, const MAX_TASKS: usize> HealthMonitor<M, MAX_TASKS> {
    pub fn new(platform: &'static dyn Platform) -> Self {
        Self::with_thresholds(platform, HealthThresholds::default())
    }

    pub fn with_thresholds(platform: &'static dyn Platform, thresholds: HealthThresholds) -> Self {
        Self {
            platform,
            thresholds,
            inner: Mutex::new(RefCell::new(HealthInner {
                entries: Vec::new(),
            })),
        }
    }

    /// Fold a task's fresh profiler metrics into its health status
    pub fn update_task(&self, task: TaskId, metrics: &TaskMetrics) {
        let now = self.platform.now_us();
        let status = classify(metrics);
        self.lock(|inner| {
            match inner.entries.iter_mut().find(|e| e.task == task) {
                Some(entry) => {
                    entry.status = status;
                    entry.last_seen_us = now;
                    entry.error_count = metrics.error_count;
                }
                None => {
                    let _ = inner.entries.push(HealthEntry {
                        task,
                        status,
                        last_seen_us: now,
                        error_count: metrics.error_count,
                    });
                }
            }
        });
    }

    pub fn task_health(&self, task: TaskId) -> TaskHealth {
        let now = self.platform.now_us();
        self.lock(|inner| {
            match inner.entries.iter().find(|e| e.task == task) {
                Some(entry) => {
                    if now.saturating_sub(entry.last_seen_us) >= UNRESPONSIVE_AFTER_US {
                        TaskHealth::Unresponsive
                    } else {
                        entry.status
                    }
                }
                None => TaskHealth::Unknown,
            }
        })
    }

    /// Aggregate a system snapshot from externally collected figures and
    /// the tracked per-task statuses.
    pub fn system_health(
        &self,
        uptime_ms: u64,
        cpu_percent: f32,
        memory_percent: f32,
        tasks: (u8, u8, u8),
        messages_dropped: u32,
        queue_utilization_percent: f32,
    ) -> SystemHealth {
        let (total, running, suspended) = tasks;
        let now = self.platform.now_us();

        let worst_task = self.lock(|inner| {
            let mut worst = TaskHealth::Unknown;
            let mut faulted = 0u8;
            for entry in inner.entries.iter() {
                let status = if now.saturating_sub(entry.last_seen_us) >= UNRESPONSIVE_AFTER_US {
                    TaskHealth::Unresponsive
                } else {
                    entry.status
                };
                if status >= TaskHealth::Critical {
                    faulted += 1;
                }
                worst = worst.max(status);
            }
            (worst, faulted)
        });

        let mut overall = worst_task.0;
        if cpu_percent >= self.thresholds.cpu_critical
            || memory_percent >= self.thresholds.memory_critical
        {
            overall = overall.max(TaskHealth::Critical);
        } else if cpu_percent >= self.thresholds.cpu_warning
            || memory_percent >= self.thresholds.memory_warning
        {
            overall = overall.max(TaskHealth::Warning);
        } else if overall == TaskHealth::Unknown && total > 0 {
            overall = TaskHealth::Healthy;
        }

        SystemHealth {
            tasks_total: total,
            tasks_running: running,
            tasks_suspended: suspended,
            tasks_faulted: worst_task.1,
            messages_dropped_total: messages_dropped,
            queue_utilization_percent,
            cpu_utilization_percent: cpu_percent,
            memory_utilization_percent: memory_percent,
            uptime_ms,
            overall,
        }
    }

    fn lock<R>(&self, f: impl FnOnce(&mut HealthInner<MAX_TASKS>) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}

fn classify(metrics: &TaskMetrics) -> TaskHealth {
    if metrics.error_count > 10 {
        TaskHealth::Critical
    } else if metrics.error_count > 5 || metrics.avg_latency_us > LATENCY_WARNING_US {
        TaskHealth::Warning
    } else if metrics.execution_count > 0 {
        TaskHealth::Healthy
    } else {
        TaskHealth::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let mut metrics = TaskMetrics::new();
        assert_eq!(classify(&metrics), TaskHealth::Unknown);

        metrics.update_execution_time(50, 1);
        assert_eq!(classify(&metrics), TaskHealth::Healthy);

        metrics.error_count = 6;
        assert_eq!(classify(&metrics), TaskHealth::Warning);

        metrics.error_count = 11;
        assert_eq!(classify(&metrics), TaskHealth::Critical);
    }
}
