//! Host (std) platform adapter
//!
//! Backs the workspace test suite: native tasks become threads, task
//! notifications become condvar-guarded bit sets, and the system reset is
//! recorded instead of performed. One instance per process; threads not
//! created through [`HostPlatform::spawn`] must call
//! [`HostPlatform::register_current_thread`] before blocking on
//! notifications.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{Platform, SpawnParams, TaskHandle};

std::thread_local! {
    static CURRENT: Cell<Option<TaskHandle>> = const { Cell::new(None) };
}

struct NotifySlot {
    value: Mutex<u32>,
    signal: Condvar,
}

pub struct HostPlatform {
    epoch: Instant,
    slots: Mutex<Vec<Arc<NotifySlot>>>,
    reset_requested: AtomicBool,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            slots: Mutex::new(Vec::new()),
            reset_requested: AtomicBool::new(false),
        }
    }

    /// Attach the calling thread to the notification machinery and return
    /// its handle, registering it on first call.
    pub fn register_current_thread(&self) -> TaskHandle {
        if let Some(handle) = CURRENT.with(|c| c.get()) {
            return handle;
        }
        let handle = self.alloc_slot();
        CURRENT.with(|c| c.set(Some(handle)));
        handle
    }

    /// Whether `system_reset` has been requested
    pub fn reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::SeqCst)
    }

    fn alloc_slot(&self) -> TaskHandle {
        let mut slots = self.slots.lock().unwrap();
        slots.push(Arc::new(NotifySlot {
            value: Mutex::new(0),
            signal: Condvar::new(),
        }));
        // Handle 0 is reserved as "no handle"
        TaskHandle::from_raw(slots.len())
    }

    fn slot(&self, handle: TaskHandle) -> Option<Arc<NotifySlot>> {
        let slots = self.slots.lock().unwrap();
        slots.get(handle.into_raw().checked_sub(1)?).cloned()
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn delay_us(&self, us: u32) {
        std::thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn spawn(&self, params: &SpawnParams<'_>) -> Option<TaskHandle> {
        let handle = self.alloc_slot();
        let entry = params.entry;
        let arg = params.arg;
        let builder = std::thread::Builder::new()
            .name(params.name.to_owned())
            .stack_size(params.stack_size.max(64 * 1024) as usize);
        builder
            .spawn(move || {
                CURRENT.with(|c| c.set(Some(handle)));
                entry(arg);
            })
            .ok()?;
        Some(handle)
    }

    fn suspend(&self, _handle: TaskHandle) -> bool {
        // Host threads cannot be suspended externally
        false
    }

    fn resume(&self, _handle: TaskHandle) -> bool {
        false
    }

    fn notify(&self, handle: TaskHandle, value: u32) -> bool {
        let Some(slot) = self.slot(handle) else {
            return false;
        };
        *slot.value.lock().unwrap() |= value;
        slot.signal.notify_all();
        true
    }

    fn wait_notification(&self, timeout_ms: u32) -> Option<u32> {
        let handle = CURRENT.with(|c| c.get())?;
        let slot = self.slot(handle)?;

        let mut value = slot.value.lock().unwrap();
        if *value == 0 {
            if timeout_ms == u32::MAX {
                while *value == 0 {
                    value = slot.signal.wait(value).unwrap();
                }
            } else {
                let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
                while *value == 0 {
                    let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                        break;
                    };
                    let (next, timed_out) = slot.signal.wait_timeout(value, left).unwrap();
                    value = next;
                    if timed_out.timed_out() {
                        break;
                    }
                }
            }
        }

        if *value != 0 {
            let taken = *value;
            *value = 0;
            Some(taken)
        } else {
            None
        }
    }

    fn clear_notification(&self) {
        if let Some(handle) = CURRENT.with(|c| c.get()) {
            if let Some(slot) = self.slot(handle) {
                *slot.value.lock().unwrap() = 0;
            }
        }
    }

    fn current_task(&self) -> Option<TaskHandle> {
        CURRENT.with(|c| c.get())
    }

    fn system_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_wakes_waiter() {
        let platform = Arc::new(HostPlatform::new());
        let handle = platform.register_current_thread();

        let remote = platform.clone();
        std::thread::spawn(move || {
            remote.delay_ms(20);
            assert!(remote.notify(handle, 0x01));
        });

        assert_eq!(platform.wait_notification(1000), Some(0x01));
        // Consumed on wake
        assert_eq!(platform.wait_notification(10), None);
    }

    #[test]
    fn test_wait_timeout() {
        let platform = HostPlatform::new();
        platform.register_current_thread();
        let begin = Instant::now();
        assert_eq!(platform.wait_notification(30), None);
        assert!(begin.elapsed() >= Duration::from_millis(25));
    }
}
