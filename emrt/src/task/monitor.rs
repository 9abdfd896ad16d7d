//! Per-task execution monitoring and yield strategies
//!
//! The native trampoline brackets every user-function call with
//! [`ExecMonitor::start_execution_timing`] / `end_execution_timing`, then
//! feeds [`ExecMonitor::adaptive_yield`] so long-running tasks give up the
//! processor according to their configured strategy.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::core::TaskId;
use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum YieldStrategy {
    /// Never yield (real-time critical)
    Never,
    /// Yield every `yield_interval` executions
    Periodic,
    /// Yield whenever no further work is queued
    OnIdle,
    /// Yield once the execution time approaches the configured maximum
    Adaptive,
}

/// Execution context of one task
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExecContext {
    pub stack_size_bytes: usize,
    pub stack_used_bytes: usize,
    pub stack_high_water_bytes: usize,

    pub strategy: YieldStrategy,
    /// Executions between yields for `Periodic`
    pub yield_interval: u32,

    pub max_execution_us: u32,
    /// 0 = no deadline
    pub deadline_us: u32,
    pub realtime: bool,

    pub execution_count: u32,
    pub total_execution_us: u64,
    pub last_start_us: u64,
}

impl ExecContext {
    pub const fn new() -> Self {
        Self {
            stack_size_bytes: 0,
            stack_used_bytes: 0,
            stack_high_water_bytes: 0,
            strategy: YieldStrategy::Adaptive,
            yield_interval: 100,
            max_execution_us: 10_000,
            deadline_us: 0,
            realtime: false,
            execution_count: 0,
            total_execution_us: 0,
            last_start_us: 0,
        }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

struct MonitorInner<const MAX_TASKS: usize> {
    ids: Vec<TaskId, MAX_TASKS>,
    contexts: Vec<ExecContext, MAX_TASKS>,
}

impl<const MAX_TASKS: usize> MonitorInner<MAX_TASKS> {
    fn find(&mut self, task: TaskId) -> Option<&mut ExecContext> {
        let idx = self.ids.iter().position(|&id| id == task)?;
        Some(&mut self.contexts[idx])
    }
}

pub struct ExecMonitor<M: RawMutex, const MAX_TASKS: usize> {
    platform: &'static dyn Platform,
    inner: Mutex<M, RefCell<MonitorInner<MAX_TASKS>>>,
}

impl<M: RawMutex, const MAX_TASKS: usize> ExecMonitor<M, MAX_TASKS> {
    pub fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            inner: Mutex::new(RefCell::new(MonitorInner {
                ids: Vec::new(),
                contexts: Vec::new(),
            })),
        }
    }

    /// Register a task; false when the table is full or the task is
    /// already registered.
    pub fn register_task(&self, task: TaskId, context: ExecContext) -> bool {
        self.lock(|inner| {
            if inner.ids.is_full() || inner.ids.contains(&task) {
                return false;
            }
            let _ = inner.ids.push(task);
            let _ = inner.contexts.push(context);
            true
        })
    }

    /// Mark a task real-time: bounded execution, optional deadline, never
    /// yields.
    pub fn set_realtime_constraints(&self, task: TaskId, max_execution_us: u32, deadline_us: u32) {
        self.lock(|inner| {
            if let Some(ctx) = inner.find(task) {
                ctx.max_execution_us = max_execution_us;
                ctx.deadline_us = deadline_us;
                ctx.realtime = true;
                ctx.strategy = YieldStrategy::Never;
            }
        });
    }

    pub fn set_yield_strategy(&self, task: TaskId, strategy: YieldStrategy, interval: u32) {
        self.lock(|inner| {
            if let Some(ctx) = inner.find(task) {
                ctx.strategy = strategy;
                ctx.yield_interval = interval.max(1);
            }
        });
    }

    /// Yield decision point for task loops
    pub fn adaptive_yield(&self, task: TaskId) {
        let now = self.platform.now_us();
        let should_yield = self.lock(|inner| {
            let Some(ctx) = inner.find(task) else {
                return false;
            };
            ctx.execution_count += 1;
            match ctx.strategy {
                YieldStrategy::Never => false,
                YieldStrategy::Periodic => ctx.execution_count % ctx.yield_interval == 0,
                YieldStrategy::OnIdle => true,
                YieldStrategy::Adaptive => {
                    ctx.last_start_us > 0
                        && (now - ctx.last_start_us) > u64::from(ctx.max_execution_us / 2)
                }
            }
        });
        if should_yield {
            self.platform.yield_now();
        }
    }

    pub fn start_execution_timing(&self, task: TaskId) {
        let now = self.platform.now_us();
        self.lock(|inner| {
            if let Some(ctx) = inner.find(task) {
                ctx.last_start_us = now;
            }
        });
    }

    pub fn end_execution_timing(&self, task: TaskId) {
        let now = self.platform.now_us();
        self.lock(|inner| {
            let Some(ctx) = inner.find(task) else {
                return;
            };
            if ctx.last_start_us == 0 {
                return;
            }
            let execution_us = now - ctx.last_start_us;
            ctx.total_execution_us += execution_us;

            if ctx.deadline_us > 0 && execution_us > u64::from(ctx.deadline_us) {
                warn!(
                    "deadline miss: task {} took {} us (limit {} us)",
                    task.into_u16(),
                    execution_us,
                    ctx.deadline_us
                );
            }
        });
    }

    /// Refresh stack accounting from the platform's high-water mark
    pub fn update_stack_usage(&self, task: TaskId) {
        let free_bytes = self.platform.stack_high_water_mark();
        if free_bytes == 0 {
            return;
        }
        let mut warn_usage = None;
        self.lock(|inner| {
            let Some(ctx) = inner.find(task) else {
                return;
            };
            if ctx.stack_size_bytes == 0 {
                return;
            }
            ctx.stack_used_bytes = ctx.stack_size_bytes.saturating_sub(free_bytes);
            ctx.stack_high_water_bytes = ctx.stack_high_water_bytes.max(ctx.stack_used_bytes);
            if ctx.stack_used_bytes > ctx.stack_size_bytes * 80 / 100 {
                warn_usage = Some((ctx.stack_used_bytes, ctx.stack_size_bytes));
            }
        });
        if let Some((used, total)) = warn_usage {
            warn!(
                "stack warning: task {} using {}/{} bytes",
                task.into_u16(),
                used,
                total
            );
        }
    }

    pub fn context(&self, task: TaskId) -> Option<ExecContext> {
        self.lock(|inner| inner.find(task).copied())
    }

    fn lock<R>(&self, f: impl FnOnce(&mut MonitorInner<MAX_TASKS>) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}
