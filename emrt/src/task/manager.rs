//! Task manager: control blocks, cooperative scheduler, native trampoline

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::core::{Error, Result, TaskId, TaskPriority};
use crate::messaging::MailboxRegistry;
use crate::platform::{Platform, SpawnParams, TaskHandle};

use super::{
    make_task_name, TaskContext, TaskFn, TaskInfo, TaskName, TaskSpec, TaskState, TaskStatistics,
};

struct Tcb {
    id: TaskId,
    name: TaskName,
    function: TaskFn,
    user_data: usize,
    priority: TaskPriority,
    state: TaskState,
    created_ms: u64,
    last_run_ms: u64,
    next_run_ms: u64,
    period_ms: u32,
    deadline_ms: u32,
    execution_ms: u32,
    run_count: u32,
    stats: TaskStatistics,
    native_handle: Option<TaskHandle>,
    stack_size: u32,
    is_native: bool,
}

struct TmInner<const MAX_TASKS: usize> {
    tasks: Vec<Tcb, MAX_TASKS>,
    next_id: u16,
    initialized: bool,
    start_ms: u64,
    context_switches: u32,
    idle_ms: u64,
}

impl<const MAX_TASKS: usize> TmInner<MAX_TASKS> {
    /// O(1): the task id is the table index
    fn find(&mut self, task: TaskId) -> Option<&mut Tcb> {
        let tcb = self.tasks.get_mut(task.index())?;
        (tcb.id == task).then_some(tcb)
    }
}

pub struct TaskManager<M: RawMutex, const MAX_TASKS: usize> {
    platform: &'static dyn Platform,
    inner: Mutex<M, RefCell<TmInner<MAX_TASKS>>>,
    tasks_ready: AtomicBool,
}

impl<M: RawMutex, const MAX_TASKS: usize> TaskManager<M, MAX_TASKS> {
    pub fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            inner: Mutex::new(RefCell::new(TmInner {
                tasks: Vec::new(),
                next_id: 0,
                initialized: false,
                start_ms: 0,
                context_switches: 0,
                idle_ms: 0,
            })),
            tasks_ready: AtomicBool::new(false),
        }
    }

    /// One-shot; a second call fails with `AlreadyExists`
    pub fn initialize(&self) -> Result<()> {
        let now = self.platform.now_ms();
        self.lock(|inner| {
            if inner.initialized {
                return Err(Error::AlreadyExists);
            }
            inner.tasks.clear();
            inner.next_id = 0;
            inner.start_ms = now;
            inner.context_switches = 0;
            inner.idle_ms = 0;
            inner.initialized = true;
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.lock(|inner| inner.initialized)
    }

    /// Create a cooperative task scheduled by [`Self::run`]
    pub fn create_task(&self, spec: &TaskSpec) -> Result<TaskId> {
        self.insert_tcb(spec, false)
    }

    /// Reserve a control block, then ask the platform for a native task
    /// running the instrumented trampoline. The platform failure rolls the
    /// control block back.
    ///
    /// The trampoline resolves its control block through the
    /// arena-resident manager, so native tasks belong on
    /// [`crate::runtime::task_manager`].
    pub fn create_native_task(&self, spec: &TaskSpec) -> Result<TaskId> {
        let id = self.insert_tcb(spec, true)?;

        let params = SpawnParams {
            entry: native_task_entry,
            arg: id.index(),
            name: spec.name,
            stack_size: spec.stack_size,
            priority: spec.native_priority,
            start_suspended: false,
            core_id: spec.core_id,
        };
        match self.platform.spawn(&params) {
            Some(handle) => {
                self.lock(|inner| {
                    if let Some(tcb) = inner.find(id) {
                        tcb.native_handle = Some(handle);
                    }
                });
                Ok(id)
            }
            None => {
                self.lock(|inner| {
                    inner.tasks.pop();
                    inner.next_id -= 1;
                });
                Err(Error::InvalidParameter)
            }
        }
    }

    /// Create every enabled task of a configuration table and register
    /// each with the broker's mailbox registry.
    pub fn create_all_tasks(
        &self,
        specs: &[TaskSpec],
        registry: &dyn MailboxRegistry,
    ) -> Result<()> {
        for spec in specs {
            if !spec.enabled {
                continue;
            }
            let id = if spec.native {
                self.create_native_task(spec)?
            } else {
                self.create_task(spec)?
            };
            let handle = self.lock(|inner| inner.find(id).and_then(|tcb| tcb.native_handle));
            registry.register_task(id, handle)?;
        }
        Ok(())
    }

    pub fn start_task(&self, task: TaskId) -> Result<()> {
        self.with_task(task, |tcb| {
            if tcb.state == TaskState::Suspended {
                tcb.state = TaskState::Ready;
                Ok(())
            } else {
                Err(Error::InvalidParameter)
            }
        })?
    }

    pub fn suspend_task(&self, task: TaskId) -> Result<()> {
        self.with_task(task, |tcb| tcb.state = TaskState::Suspended)
    }

    pub fn resume_task(&self, task: TaskId) -> Result<()> {
        self.start_task(task)
    }

    pub fn set_task_priority(&self, task: TaskId, priority: TaskPriority) -> Result<()> {
        self.with_task(task, |tcb| tcb.priority = priority)
    }

    pub fn set_task_period(&self, task: TaskId, period_ms: u32) -> Result<()> {
        self.with_task(task, |tcb| tcb.period_ms = period_ms)
    }

    pub fn set_task_deadline(&self, task: TaskId, deadline_ms: u32) -> Result<()> {
        self.with_task(task, |tcb| tcb.deadline_ms = deadline_ms)
    }

    pub fn reset_task_statistics(&self, task: TaskId) -> Result<()> {
        self.with_task(task, |tcb| {
            tcb.stats = TaskStatistics::new();
            tcb.run_count = 0;
        })
    }

    pub fn get_task_info(&self, task: TaskId) -> Result<TaskInfo> {
        self.with_task(task, |tcb| TaskInfo {
            id: tcb.id,
            name: tcb.name.clone(),
            priority: tcb.priority,
            state: tcb.state,
            created_ms: tcb.created_ms,
            last_run_ms: tcb.last_run_ms,
            period_ms: tcb.period_ms,
            deadline_ms: tcb.deadline_ms,
            run_count: tcb.run_count,
            execution_ms: tcb.execution_ms,
            stack_size: tcb.stack_size,
            stats: tcb.stats,
            is_native: tcb.is_native,
        })
    }

    pub fn get_task_by_name(&self, name: &str) -> Result<TaskId> {
        self.lock(|inner| {
            inner
                .tasks
                .iter()
                .find(|tcb| tcb.name.as_str() == name)
                .map(|tcb| tcb.id)
                .ok_or(Error::NotFound)
        })
    }

    /// Id of the calling native task
    pub fn get_current_task_id(&self) -> Option<TaskId> {
        let handle = self.platform.current_task()?;
        self.lock(|inner| {
            inner
                .tasks
                .iter()
                .find(|tcb| tcb.native_handle == Some(handle))
                .map(|tcb| tcb.id)
        })
    }

    pub fn task_count(&self) -> usize {
        self.lock(|inner| inner.tasks.len())
    }

    /// Release native tasks parked in [`Self::wait_until_ready`]
    pub fn start_all_tasks(&self) {
        self.tasks_ready.store(true, Ordering::Release);
    }

    /// Park until [`Self::start_all_tasks`]; called by the trampoline
    pub fn wait_until_ready(&self) {
        while !self.tasks_ready.load(Ordering::Acquire) {
            self.platform.delay_ms(10);
        }
    }

    /// One cooperative scheduler pass: execute the highest-priority ready
    /// task that is due, or sleep one millisecond when none is.
    pub fn run(&self) {
        let now = self.platform.now_ms();

        let picked = self.lock(|inner| {
            if !inner.initialized {
                return None;
            }
            let mut best: Option<usize> = None;
            let mut best_priority = TaskPriority::Idle;
            for (idx, tcb) in inner.tasks.iter().enumerate() {
                if tcb.state != TaskState::Ready || tcb.is_native {
                    continue;
                }
                if tcb.period_ms > 0 && now < tcb.next_run_ms {
                    continue;
                }
                if best.is_none() || tcb.priority > best_priority {
                    best_priority = tcb.priority;
                    best = Some(idx);
                }
            }
            let idx = best?;
            let tcb = &mut inner.tasks[idx];
            tcb.state = TaskState::Running;
            tcb.last_run_ms = now;
            Some((
                idx,
                tcb.function,
                TaskContext {
                    task: tcb.id,
                    user_data: tcb.user_data,
                },
            ))
        });

        let Some((idx, function, ctx)) = picked else {
            if self.is_initialized() {
                self.platform.delay_ms(1);
                self.lock(|inner| inner.idle_ms += 1);
            }
            return;
        };

        let begin = self.platform.now_ms();
        function(ctx);
        let elapsed = (self.platform.now_ms() - begin) as u32;

        self.lock(|inner| {
            inner.context_switches += 1;
            let tcb = &mut inner.tasks[idx];
            tcb.execution_ms = elapsed;
            tcb.run_count += 1;

            tcb.stats.min_execution_ms = tcb.stats.min_execution_ms.min(elapsed);
            tcb.stats.max_execution_ms = tcb.stats.max_execution_ms.max(elapsed);
            tcb.stats.total_execution_ms += elapsed;
            tcb.stats.avg_execution_ms = tcb.stats.total_execution_ms / tcb.run_count;

            if tcb.deadline_ms > 0 && elapsed > tcb.deadline_ms {
                tcb.stats.missed_deadlines += 1;
            }

            if tcb.period_ms > 0 {
                tcb.next_run_ms = now + u64::from(tcb.period_ms);
                tcb.state = TaskState::Ready;
            } else {
                tcb.state = TaskState::Completed;
            }
        });
    }

    pub fn total_context_switches(&self) -> u32 {
        self.lock(|inner| inner.context_switches)
    }

    pub fn uptime_ms(&self) -> u64 {
        let start = self.lock(|inner| inner.start_ms);
        self.platform.now_ms().saturating_sub(start)
    }

    /// 0..=100, from cooperative idle accounting
    pub fn cpu_utilization(&self) -> u8 {
        let uptime = self.uptime_ms();
        if uptime == 0 {
            return 0;
        }
        let idle = self.lock(|inner| inner.idle_ms);
        ((uptime.saturating_sub(idle)) * 100 / uptime) as u8
    }

    pub(crate) fn trampoline_view(&self, task: TaskId) -> Option<(TaskFn, TaskContext, u32)> {
        self.lock(|inner| {
            let tcb = inner.find(task)?;
            Some((
                tcb.function,
                TaskContext {
                    task: tcb.id,
                    user_data: tcb.user_data,
                },
                tcb.period_ms,
            ))
        })
    }

    fn insert_tcb(&self, spec: &TaskSpec, native: bool) -> Result<TaskId> {
        let now = self.platform.now_ms();
        self.lock(|inner| {
            if !inner.initialized {
                return Err(Error::NotInitialized);
            }
            if inner.tasks.is_full() {
                return Err(Error::OutOfMemory);
            }
            let id = unwrap!(TaskId::new(inner.next_id));
            inner.next_id += 1;
            let tcb = Tcb {
                id,
                name: make_task_name(spec.name),
                function: spec.function,
                user_data: spec.user_data,
                priority: spec.priority,
                state: TaskState::Ready,
                created_ms: now,
                last_run_ms: 0,
                next_run_ms: now,
                period_ms: spec.period_ms,
                deadline_ms: spec.deadline_ms,
                execution_ms: 0,
                run_count: 0,
                stats: TaskStatistics::new(),
                native_handle: None,
                stack_size: spec.stack_size,
                is_native: native,
            };
            let _ = inner.tasks.push(tcb);
            Ok(id)
        })
    }

    fn with_task<R>(&self, task: TaskId, f: impl FnOnce(&mut Tcb) -> R) -> Result<R> {
        self.lock(|inner| inner.find(task).map(f).ok_or(Error::NotFound))
    }

    fn lock<R>(&self, f: impl FnOnce(&mut TmInner<MAX_TASKS>) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}

/// Entry point of every native task: wait for the start gate, then run the
/// user function under watchdog feeding, execution timing, stack tracking
/// and adaptive yielding. Periodic tasks loop forever; one-shot tasks run
/// once with a single final feed.
pub(crate) fn native_task_entry(arg: usize) {
    let Some(task) = u16::try_from(arg).ok().and_then(TaskId::new) else {
        return;
    };
    let manager = crate::runtime::task_manager();
    manager.wait_until_ready();

    let Some((function, ctx, period_ms)) = manager.trampoline_view(task) else {
        return;
    };
    let platform = crate::runtime::platform();
    let monitor = crate::runtime::exec_monitor();
    let watchdog = crate::runtime::watchdog();

    if period_ms > 0 {
        loop {
            monitor.start_execution_timing(task);
            function(ctx);
            monitor.end_execution_timing(task);
            watchdog.feed(task);
            monitor.update_stack_usage(task);
            monitor.adaptive_yield(task);
            platform.delay_ms(period_ms);
        }
    } else {
        monitor.start_execution_timing(task);
        function(ctx);
        monitor.end_execution_timing(task);
        // One-time feed so a registered watchdog does not fire early
        watchdog.feed(task);
    }
}
