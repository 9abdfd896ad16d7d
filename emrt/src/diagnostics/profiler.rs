//! Per-task performance metrics

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::core::TaskId;
use crate::platform::Platform;

/// Timing and load metrics of one task, all in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskMetrics {
    pub min_execution_us: u32,
    pub max_execution_us: u32,
    pub avg_execution_us: u32,
    pub total_execution_us: u64,

    pub min_latency_us: u32,
    pub max_latency_us: u32,
    pub avg_latency_us: u32,

    pub execution_count: u32,
    pub message_count: u32,
    pub error_count: u32,

    /// Percentage × 100 for integer math
    pub cpu_usage_percent_x100: u32,

    pub stack_usage_bytes: usize,
    pub peak_stack_usage_bytes: usize,

    pub last_update_us: u64,
}

impl TaskMetrics {
    pub const fn new() -> Self {
        Self {
            min_execution_us: u32::MAX,
            max_execution_us: 0,
            avg_execution_us: 0,
            total_execution_us: 0,
            min_latency_us: u32::MAX,
            max_latency_us: 0,
            avg_latency_us: 0,
            execution_count: 0,
            message_count: 0,
            error_count: 0,
            cpu_usage_percent_x100: 0,
            stack_usage_bytes: 0,
            peak_stack_usage_bytes: 0,
            last_update_us: 0,
        }
    }

    pub fn update_execution_time(&mut self, execution_us: u32, now_us: u64) {
        self.execution_count += 1;
        self.total_execution_us += u64::from(execution_us);
        self.min_execution_us = self.min_execution_us.min(execution_us);
        self.max_execution_us = self.max_execution_us.max(execution_us);
        self.avg_execution_us =
            (self.total_execution_us / u64::from(self.execution_count)) as u32;
        self.last_update_us = now_us;
    }

    /// EWMA with 7/8 weight on history
    pub fn update_latency(&mut self, latency_us: u32) {
        self.message_count += 1;
        self.min_latency_us = self.min_latency_us.min(latency_us);
        self.max_latency_us = self.max_latency_us.max(latency_us);
        if self.avg_latency_us == 0 {
            self.avg_latency_us = latency_us;
        } else {
            self.avg_latency_us =
                ((u64::from(self.avg_latency_us) * 7 + u64::from(latency_us)) / 8) as u32;
        }
    }

    pub fn update_stack_usage(&mut self, used_bytes: usize) {
        self.stack_usage_bytes = used_bytes;
        self.peak_stack_usage_bytes = self.peak_stack_usage_bytes.max(used_bytes);
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for TaskMetrics {
    fn default() -> Self {
        Self::new()
    }
}

struct ProfilerInner<const MAX_TASKS: usize> {
    ids: Vec<TaskId, MAX_TASKS>,
    metrics: Vec<TaskMetrics, MAX_TASKS>,
}

impl<const MAX_TASKS: usize> ProfilerInner<MAX_TASKS> {
    fn find(&mut self, task: TaskId) -> Option<&mut TaskMetrics> {
        let idx = self.ids.iter().position(|&id| id == task)?;
        Some(&mut self.metrics[idx])
    }
}

pub struct Profiler<M: RawMutex, const MAX_TASKS: usize> {
    platform: &'static dyn Platform,
    inner: Mutex<M, RefCell<ProfilerInner<MAX_TASKS>>>,
}

impl<M: RawMutex, const MAX_TASKS: usize> Profiler<M, MAX_TASKS> {
    pub fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            inner: Mutex::new(RefCell::new(ProfilerInner {
                ids: Vec::new(),
                metrics: Vec::new(),
            })),
        }
    }

    pub fn register_task(&self, task: TaskId) -> bool {
        self.lock(|inner| {
            if inner.ids.is_full() || inner.ids.contains(&task) {
                return false;
            }
            let _ = inner.ids.push(task);
            let _ = inner.metrics.push(TaskMetrics::new());
            true
        })
    }

    pub fn record_execution(&self, task: TaskId, execution_us: u32) {
        let now = self.platform.now_us();
        self.lock(|inner| {
            if let Some(metrics) = inner.find(task) {
                metrics.update_execution_time(execution_us, now);
            }
        });
    }

    /// Record message delivery latency (publish timestamp to receive)
    pub fn record_latency(&self, task: TaskId, latency_us: u32) {
        self.lock(|inner| {
            if let Some(metrics) = inner.find(task) {
                metrics.update_latency(latency_us);
            }
        });
    }

    pub fn record_error(&self, task: TaskId) {
        self.lock(|inner| {
            if let Some(metrics) = inner.find(task) {
                metrics.error_count += 1;
            }
        });
    }

    pub fn record_stack_usage(&self, task: TaskId, used_bytes: usize) {
        self.lock(|inner| {
            if let Some(metrics) = inner.find(task) {
                metrics.update_stack_usage(used_bytes);
            }
        });
    }

    pub fn metrics(&self, task: TaskId) -> Option<TaskMetrics> {
        self.lock(|inner| inner.find(task).copied())
    }

    pub fn reset(&self, task: TaskId) {
        self.lock(|inner| {
            if let Some(metrics) = inner.find(task) {
                metrics.reset();
            }
        });
    }

    pub fn reset_all(&self) {
        self.lock(|inner| {
            for metrics in inner.metrics.iter_mut() {
                metrics.reset();
            }
        });
    }

    fn lock<R>(&self, f: impl FnOnce(&mut ProfilerInner<MAX_TASKS>) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_statistics() {
        let mut metrics = TaskMetrics::new();
        metrics.update_execution_time(100, 1);
        metrics.update_execution_time(300, 2);

        assert_eq!(metrics.min_execution_us, 100);
        assert_eq!(metrics.max_execution_us, 300);
        assert_eq!(metrics.avg_execution_us, 200);
        assert_eq!(metrics.execution_count, 2);
    }

    #[test]
    fn test_latency_ewma() {
        let mut metrics = TaskMetrics::new();
        metrics.update_latency(800);
        assert_eq!(metrics.avg_latency_us, 800);

        metrics.update_latency(0);
        assert_eq!(metrics.avg_latency_us, 700);
        assert_eq!(metrics.max_latency_us, 800);
        assert_eq!(metrics.min_latency_us, 0);
    }
}
