//! Per-task watchdog with pluggable recovery actions
//!
//! Tasks feed their entry periodically (the native trampoline does it
//! automatically); a dedicated monitor task calls
//! [`Watchdog::check_all`]. An expired deadline fires the configured
//! action and restarts the timer. A separate system watchdog resets the
//! whole system on global starvation.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::config;
use crate::core::{Error, Result, TaskId};
use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogAction {
    None,
    LogWarning,
    /// Invoke the registered recovery callback
    ResetTask,
    SystemReset,
}

/// Recovery callback for `WatchdogAction::ResetTask`
pub type RecoveryFn = fn(TaskId);

/// Observer invoked on every per-task timeout with the task and its
/// accumulated timeout count
pub type TimeoutHook = fn(TaskId, u32);

struct WatchdogEntry {
    task: TaskId,
    last_feed_us: u64,
    timeout_ms: u32,
    action: WatchdogAction,
    recovery: Option<RecoveryFn>,
    timeout_count: u32,
    enabled: bool,
}

struct WatchdogInner<const MAX_TASKS: usize> {
    entries: Vec<WatchdogEntry, MAX_TASKS>,
    system_enabled: bool,
    system_timeout_ms: u32,
    last_system_feed_us: u64,
    timeout_hook: Option<TimeoutHook>,
}

impl<const MAX_TASKS: usize> WatchdogInner<MAX_TASKS> {
    fn find(&mut self, task: TaskId) -> Option<&mut WatchdogEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.task == task && e.enabled)
    }
}

pub struct Watchdog<M: RawMutex, const MAX_TASKS: usize> {
    platform: &'static dyn Platform,
    inner: Mutex<M, RefCell<WatchdogInner<MAX_TASKS>>>,
}

impl<M: RawMutex, const MAX_TASKS: usize> Watchdog<M, MAX_TASKS> {
    pub fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            inner: Mutex::new(RefCell::new(WatchdogInner {
                entries: Vec::new(),
                system_enabled: false,
                system_timeout_ms: config::DEFAULT_SYSTEM_WATCHDOG_TIMEOUT_MS,
                last_system_feed_us: 0,
                timeout_hook: None,
            })),
        }
    }

    pub fn register_task(
        &self,
        task: TaskId,
        timeout_ms: u32,
        action: WatchdogAction,
    ) -> Result<()> {
        let now = self.platform.now_us();
        self.lock(|inner| {
            if inner.entries.is_full() {
                return Err(Error::OutOfMemory);
            }
            let _ = inner.entries.push(WatchdogEntry {
                task,
                last_feed_us: now,
                timeout_ms,
                action,
                recovery: None,
                timeout_count: 0,
                enabled: true,
            });
            Ok(())
        })
    }

    /// Record that `task` is alive
    pub fn feed(&self, task: TaskId) {
        let now = self.platform.now_us();
        self.lock(|inner| {
            if let Some(entry) = inner.find(task) {
                entry.last_feed_us = now;
            }
        });
    }

    pub fn set_timeout(&self, task: TaskId, timeout_ms: u32) -> Result<()> {
        self.with_entry(task, |entry| entry.timeout_ms = timeout_ms)
    }

    pub fn set_action(&self, task: TaskId, action: WatchdogAction) -> Result<()> {
        self.with_entry(task, |entry| entry.action = action)
    }

    pub fn set_recovery(&self, task: TaskId, recovery: RecoveryFn) -> Result<()> {
        self.with_entry(task, |entry| entry.recovery = Some(recovery))
    }

    /// Observer for timeout events, e.g. to forward them to the event bus
    pub fn set_timeout_hook(&self, hook: TimeoutHook) {
        self.lock(|inner| inner.timeout_hook = Some(hook));
    }

    pub fn is_alive(&self, task: TaskId) -> bool {
        let now = self.platform.now_us();
        self.lock(|inner| match inner.find(task) {
            Some(entry) => (now - entry.last_feed_us) / 1000 < u64::from(entry.timeout_ms),
            None => false,
        })
    }

    /// Evaluate every enabled entry plus the system watchdog. Call
    /// periodically from a dedicated monitor task.
    pub fn check_all(&self) {
        let now = self.platform.now_us();

        // Collect expirations under the lock, act outside it
        let mut fired: Vec<(TaskId, WatchdogAction, Option<RecoveryFn>, u32), MAX_TASKS> =
            Vec::new();
        let hook = self.lock(|inner| {
            for entry in inner.entries.iter_mut() {
                if !entry.enabled {
                    continue;
                }
                let elapsed_ms = (now - entry.last_feed_us) / 1000;
                if elapsed_ms >= u64::from(entry.timeout_ms) {
                    entry.timeout_count += 1;
                    let _ = fired.push((
                        entry.task,
                        entry.action,
                        entry.recovery,
                        entry.timeout_count,
                    ));
                    entry.last_feed_us = now;
                }
            }
            inner.timeout_hook
        });

        for (task, action, recovery, count) in fired {
            if let Some(hook) = hook {
                hook(task, count);
            }
            match action {
                WatchdogAction::None => {}
                WatchdogAction::LogWarning => {
                    warn!(
                        "watchdog: task {} timeout ({} occurrences)",
                        task.into_u16(),
                        count
                    );
                }
                WatchdogAction::ResetTask => {
                    warn!("watchdog: resetting task {}", task.into_u16());
                    if let Some(recovery) = recovery {
                        recovery(task);
                    }
                }
                WatchdogAction::SystemReset => {
                    error!("watchdog: system reset triggered by task {}", task.into_u16());
                    // Let the log drain before going down
                    self.platform.delay_ms(100);
                    self.platform.system_reset();
                }
            }
        }

        let system_expired = self.lock(|inner| {
            inner.system_enabled
                && (now - inner.last_system_feed_us) / 1000 >= u64::from(inner.system_timeout_ms)
        });
        if system_expired {
            error!("system watchdog timeout");
            self.platform.delay_ms(100);
            self.platform.system_reset();
        }
    }

    pub fn enable_task(&self, task: TaskId, enable: bool) {
        let now = self.platform.now_us();
        self.lock(|inner| {
            // Match regardless of the enabled flag so re-enabling works
            if let Some(entry) = inner.entries.iter_mut().find(|e| e.task == task) {
                entry.enabled = enable;
                if enable {
                    entry.last_feed_us = now;
                }
            }
        });
    }

    pub fn enable_system_watchdog(&self, timeout_ms: u32) {
        let now = self.platform.now_us();
        self.lock(|inner| {
            inner.system_enabled = true;
            inner.system_timeout_ms = timeout_ms;
            inner.last_system_feed_us = now;
        });
        info!("system watchdog enabled: {} ms timeout", timeout_ms);
    }

    pub fn feed_system(&self) {
        let now = self.platform.now_us();
        self.lock(|inner| inner.last_system_feed_us = now);
    }

    pub fn timeout_count(&self, task: TaskId) -> u32 {
        self.lock(|inner| inner.find(task).map_or(0, |e| e.timeout_count))
    }

    pub fn reset_statistics(&self) {
        self.lock(|inner| {
            for entry in inner.entries.iter_mut() {
                entry.timeout_count = 0;
            }
        });
    }

    fn with_entry<R>(&self, task: TaskId, f: impl FnOnce(&mut WatchdogEntry) -> R) -> Result<R> {
        self.lock(|inner| inner.find(task).map(f).ok_or(Error::NotFound))
    }

    fn lock<R>(&self, f: impl FnOnce(&mut WatchdogInner<MAX_TASKS>) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }
}
