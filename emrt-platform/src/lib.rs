//! Platform adapter contract for the emrt runtime
//!
//! The runtime itself is platform-agnostic: time, delays, native task
//! primitives, task notifications and the system reset all come from an
//! implementation of [`Platform`] supplied by the integrator at
//! initialization. RTOS bindings (FreeRTOS, Zephyr, bare-metal tick
//! counters) live outside this workspace; the `std`-gated [`host`] adapter
//! in this crate backs the test suite.
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
pub mod host;

/// Opaque handle to a native task
///
/// The value is produced and interpreted by the platform only. The runtime
/// stores and compares it, nothing more.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(usize);

impl TaskHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> usize {
        self.0
    }
}

/// Entry point the platform runs inside a freshly created native task
pub type TaskEntry = fn(usize);

/// Parameters for native task creation
#[derive(Debug, Clone, Copy)]
pub struct SpawnParams<'a> {
    pub entry: TaskEntry,
    pub arg: usize,
    pub name: &'a str,
    /// Stack size in bytes; the platform converts to words if needed
    pub stack_size: u32,
    /// Platform-native priority value
    pub priority: u32,
    pub start_suspended: bool,
    /// Pin to a CPU core on multi-core parts; `None` leaves placement free
    pub core_id: Option<u8>,
}

/// Notification bit the broker sets when a mailbox gains a message
pub const NOTIFY_MESSAGE: u32 = 0x01;

/// The services the runtime consumes from the platform.
///
/// All methods must be callable from task context; `notify` must
/// additionally be ISR-safe on platforms that deliver bytes from
/// interrupts. Implementations are expected to be cheap: the runtime calls
/// `now_us` on every publish.
pub trait Platform: Sync {
    /// Monotonic microseconds since boot
    fn now_us(&self) -> u64;

    /// Monotonic milliseconds since boot
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }

    fn delay_ms(&self, ms: u32);

    fn delay_us(&self, us: u32);

    /// Give up the processor without blocking
    fn yield_now(&self);

    /// Create a native task; `None` on failure
    fn spawn(&self, params: &SpawnParams<'_>) -> Option<TaskHandle>;

    fn suspend(&self, handle: TaskHandle) -> bool;

    fn resume(&self, handle: TaskHandle) -> bool;

    /// Post a notification value to a task; bits OR into any pending value
    fn notify(&self, handle: TaskHandle, value: u32) -> bool;

    /// Block the calling task until notified or the timeout elapses.
    /// Returns the consumed notification value. `u32::MAX` waits forever.
    fn wait_notification(&self, timeout_ms: u32) -> Option<u32>;

    /// Discard any pending notification of the calling task
    fn clear_notification(&self);

    /// Handle of the calling task, if it was created through `spawn`
    fn current_task(&self) -> Option<TaskHandle>;

    /// Remaining stack headroom of the calling task in bytes; 0 if unknown
    fn stack_high_water_mark(&self) -> usize {
        0
    }

    /// Reset the whole system. May return on hosts; firmware adapters do not.
    fn system_reset(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trip() {
        let handle = TaskHandle::from_raw(7);
        assert_eq!(handle.into_raw(), 7);
        assert_eq!(handle, TaskHandle::from_raw(7));
    }
}
