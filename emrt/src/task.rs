//! Task management: control blocks, scheduler, execution monitor, watchdog

mod manager;
mod monitor;
mod watchdog;

pub use manager::TaskManager;
pub use monitor::{ExecContext, ExecMonitor, YieldStrategy};
pub use watchdog::{RecoveryFn, TimeoutHook, Watchdog, WatchdogAction};

use heapless::String;

use crate::config;
use crate::core::{TaskId, TaskPriority};

pub type TaskName = String<{ config::MAX_TASK_NAME_LEN }>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Idle,
    Ready,
    Running,
    Suspended,
    Completed,
}

/// Argument handed to every task function
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskContext {
    /// The task's own id
    pub task: TaskId,
    /// Integrator-defined word from the task's spec; 0 when unset
    pub user_data: usize,
}

pub type TaskFn = fn(TaskContext);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskStatistics {
    pub min_execution_ms: u32,
    pub max_execution_ms: u32,
    pub avg_execution_ms: u32,
    pub total_execution_ms: u32,
    pub missed_deadlines: u32,
}

impl TaskStatistics {
    pub const fn new() -> Self {
        Self {
            min_execution_ms: u32::MAX,
            max_execution_ms: 0,
            avg_execution_ms: 0,
            total_execution_ms: 0,
            missed_deadlines: 0,
        }
    }
}

impl Default for TaskStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Static task description, one table entry per task
///
/// `period_ms == 0` runs the task once; a periodic task is rescheduled
/// every period. Native tasks get a real platform task wrapped in the
/// instrumented trampoline; the rest run from the cooperative scheduler
/// pass.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    pub function: TaskFn,
    pub name: &'static str,
    pub user_data: usize,
    pub priority: TaskPriority,
    pub period_ms: u32,
    pub deadline_ms: u32,
    pub stack_size: u32,
    /// Platform-native priority for native tasks
    pub native_priority: u32,
    pub core_id: Option<u8>,
    pub native: bool,
    pub enabled: bool,
}

impl TaskSpec {
    pub const fn new(name: &'static str, function: TaskFn) -> Self {
        Self {
            function,
            name,
            user_data: 0,
            priority: TaskPriority::Normal,
            period_ms: 0,
            deadline_ms: 0,
            stack_size: config::DEFAULT_STACK_SIZE,
            native_priority: 1,
            core_id: None,
            native: false,
            enabled: true,
        }
    }
}

/// Snapshot of one task's control block
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: TaskName,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub created_ms: u64,
    pub last_run_ms: u64,
    pub period_ms: u32,
    pub deadline_ms: u32,
    pub run_count: u32,
    pub execution_ms: u32,
    pub stack_size: u32,
    pub stats: TaskStatistics,
    pub is_native: bool,
}

pub(crate) fn make_task_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
