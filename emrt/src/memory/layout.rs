//! Compile-time arena layout
//!
//! The arena is carved into named regions, one per subsystem, each 8-byte
//! aligned and sized from the concrete singleton types the region hosts
//! (so `size_of::<T>() ≤ region.size` holds by construction). A feature
//! that is disabled zeroes its region. The total is checked against the
//! configured memory budget at compile time.

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub offset: usize,
    pub size: usize,
}

impl Region {
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

pub const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

/// Size of one singleton slot inside a region
const fn slot(size: usize) -> usize {
    align_up(size, 8)
}

/// Byte offsets of the singletons inside their regions. The end marker of
/// each group doubles as the region size.
pub(crate) mod offsets {
    use core::mem::size_of;

    use super::slot;
    use crate::runtime::{
        MediumBroker, MessageTrace, ProtocolEngine, SmallBroker, SystemEventBus,
        SystemExecMonitor, SystemHealthMonitor, SystemMemoryManager, SystemProfiler,
        SystemTaskManager, SystemWatchdog, ZcBlockPool, ZcBroker,
    };

    // messaging region
    pub const MEDIUM_BROKER: usize = 0;
    pub const SMALL_BROKER: usize = MEDIUM_BROKER + slot(size_of::<MediumBroker>());
    pub const ZC_POOL: usize = SMALL_BROKER
        + if cfg!(feature = "small-broker") {
            slot(size_of::<SmallBroker>())
        } else {
            0
        };
    pub const ZC_BROKER: usize = ZC_POOL
        + if cfg!(feature = "zc") {
            slot(size_of::<ZcBlockPool>())
        } else {
            0
        };
    pub const MESSAGE_TRACE: usize = ZC_BROKER
        + if cfg!(feature = "zc") {
            slot(size_of::<ZcBroker>())
        } else {
            0
        };
    pub const MESSAGING_END: usize = MESSAGE_TRACE
        + if cfg!(feature = "event-log") {
            slot(size_of::<MessageTrace>())
        } else {
            0
        };

    // events region
    pub const EVENT_BUS: usize = 0;
    pub const EVENTS_END: usize = EVENT_BUS + slot(size_of::<SystemEventBus>());

    // tasks region
    pub const TASK_MANAGER: usize = 0;
    pub const WATCHDOG: usize = TASK_MANAGER + slot(size_of::<SystemTaskManager>());
    pub const EXEC_MONITOR: usize = WATCHDOG + slot(size_of::<SystemWatchdog>());
    pub const TASKS_END: usize = EXEC_MONITOR + slot(size_of::<SystemExecMonitor>());

    // protocol region
    pub const PROTOCOL_ENGINE: usize = 0;
    pub const PROTOCOL_END: usize = PROTOCOL_ENGINE + slot(size_of::<ProtocolEngine>());

    // diagnostics region
    pub const PROFILER: usize = 0;
    pub const HEALTH_MONITOR: usize = PROFILER + slot(size_of::<SystemProfiler>());
    pub const DIAGNOSTICS_END: usize = HEALTH_MONITOR + slot(size_of::<SystemHealthMonitor>());

    // pools region
    pub const MEMORY_MANAGER: usize = 0;
    pub const POOLS_END: usize = MEMORY_MANAGER + slot(size_of::<SystemMemoryManager>());
}

const MESSAGING_BYTES: usize = if cfg!(feature = "messaging") {
    offsets::MESSAGING_END
} else {
    0
};
const EVENTS_BYTES: usize = if cfg!(feature = "events") {
    offsets::EVENTS_END
} else {
    0
};
const TASKS_BYTES: usize = offsets::TASKS_END;
const OS_BYTES: usize = align_up(config::OS_REGION_BYTES, 8);
const PROTOCOL_BYTES: usize = if cfg!(feature = "protocol") {
    offsets::PROTOCOL_END
} else {
    0
};
const DIAGNOSTICS_BYTES: usize = if cfg!(feature = "diagnostics") {
    offsets::DIAGNOSTICS_END
} else {
    0
};
const POOLS_BYTES: usize = if cfg!(feature = "pools") {
    offsets::POOLS_END
} else {
    0
};

/// The region catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    pub messaging: Region,
    pub events: Region,
    pub tasks: Region,
    pub os: Region,
    pub protocol: Region,
    pub diagnostics: Region,
    pub pools: Region,
    /// Total upper bound including alignment padding
    pub total: usize,
}

impl Layout {
    const fn compute() -> Self {
        const ALIGN: usize = 8;
        let mut offset = 0;

        let messaging = Region {
            offset: align_up(offset, ALIGN),
            size: MESSAGING_BYTES,
        };
        offset = messaging.end();

        let events = Region {
            offset: align_up(offset, ALIGN),
            size: EVENTS_BYTES,
        };
        offset = events.end();

        let tasks = Region {
            offset: align_up(offset, ALIGN),
            size: TASKS_BYTES,
        };
        offset = tasks.end();

        let os = Region {
            offset: align_up(offset, ALIGN),
            size: OS_BYTES,
        };
        offset = os.end();

        let protocol = Region {
            offset: align_up(offset, ALIGN),
            size: PROTOCOL_BYTES,
        };
        offset = protocol.end();

        let diagnostics = Region {
            offset: align_up(offset, ALIGN),
            size: DIAGNOSTICS_BYTES,
        };
        offset = diagnostics.end();

        let pools = Region {
            offset: align_up(offset, ALIGN),
            size: POOLS_BYTES,
        };
        offset = pools.end();

        Self {
            messaging,
            events,
            tasks,
            os,
            protocol,
            diagnostics,
            pools,
            total: align_up(offset, ALIGN),
        }
    }
}

pub const LAYOUT: Layout = Layout::compute();
pub const REQUIRED_BYTES: usize = LAYOUT.total;

const _: () = assert!(
    config::MEMORY_BUDGET_BYTES == 0 || REQUIRED_BYTES <= config::MEMORY_BUDGET_BYTES,
    "arena layout exceeds EMRT_MEMORY_BUDGET_BYTES: raise the budget or lower the capacity constants"
);
