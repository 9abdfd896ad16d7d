//! Central runtime arena and region singletons
//!
//! One statically sized byte buffer backs every runtime singleton. Each
//! singleton is placement-constructed into its region slot on first
//! access (inside a critical section, exactly once per program run) and
//! handed out as a `&'static` borrow; singletons never move and are never
//! dropped.
//!
//! [`init`] must run before the first singleton access:
//!
//! ```no_run
//! use static_cell::StaticCell;
//!
//! # fn platform_instance() -> emrt_platform::host::HostPlatform { unimplemented!() }
//! static PLATFORM: StaticCell<emrt_platform::host::HostPlatform> = StaticCell::new();
//! let platform = PLATFORM.init(platform_instance());
//! emrt::runtime::init(platform);
//! let broker = emrt::runtime::medium_broker();
//! ```

use core::cell::{Cell, RefCell, UnsafeCell};
use core::mem::align_of;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config;
use crate::memory::layout::{offsets, LAYOUT, REQUIRED_BYTES};
use crate::messaging::{EventLog, MediumMessage, MessageBroker, SmallMessage, ZeroCopyPool};
use crate::platform::Platform;
use crate::protocol::{DefaultFrame, FieldDecoder, FieldEncoder, PacketPipeline};

type Crs = CriticalSectionRawMutex;

// Concrete singleton types, instantiated from the capacity budget
pub type MediumBroker = MessageBroker<Crs, MediumMessage, { config::MAX_TASKS }>;
pub type SmallBroker = MessageBroker<Crs, SmallMessage, { config::MAX_TASKS }>;
pub type ZcBlockPool =
    ZeroCopyPool<Crs, { config::ZC_BLOCK_SIZE }, { config::ZC_BLOCK_COUNT }>;
pub type ZcEnvelope =
    crate::messaging::ZcMessage<Crs, { config::ZC_BLOCK_SIZE }, { config::ZC_BLOCK_COUNT }>;
pub type ZcBroker = MessageBroker<Crs, ZcEnvelope, { config::MAX_TASKS }>;
pub type MessageTrace = EventLog<Crs, MediumMessage, { config::EVENT_LOG_CAPACITY }, true>;
pub type SystemEventBus =
    crate::event::EventBus<Crs, { config::MAX_EVENT_HANDLERS }, { config::MAX_EVENTS }>;
pub type SystemTaskManager = crate::task::TaskManager<Crs, { config::MAX_TASKS }>;
pub type SystemWatchdog = crate::task::Watchdog<Crs, { config::MAX_TASKS }>;
pub type SystemExecMonitor = crate::task::ExecMonitor<Crs, { config::MAX_TASKS }>;
pub type SystemProfiler = crate::diagnostics::Profiler<Crs, { config::MAX_TASKS }>;
pub type SystemHealthMonitor = crate::diagnostics::HealthMonitor<Crs, { config::MAX_TASKS }>;
pub type SystemMemoryManager = crate::memory::MemoryManager<Crs>;

const _: () = {
    assert!(align_of::<MediumBroker>() <= 8);
    assert!(align_of::<SmallBroker>() <= 8);
    assert!(align_of::<ZcBlockPool>() <= 8);
    assert!(align_of::<ZcBroker>() <= 8);
    assert!(align_of::<MessageTrace>() <= 8);
    assert!(align_of::<SystemEventBus>() <= 8);
    assert!(align_of::<SystemTaskManager>() <= 8);
    assert!(align_of::<SystemWatchdog>() <= 8);
    assert!(align_of::<SystemExecMonitor>() <= 8);
    assert!(align_of::<ProtocolEngine>() <= 8);
    assert!(align_of::<SystemProfiler>() <= 8);
    assert!(align_of::<SystemHealthMonitor>() <= 8);
    assert!(align_of::<SystemMemoryManager>() <= 8);
};

#[repr(align(8))]
struct ArenaStorage(UnsafeCell<[u8; REQUIRED_BYTES]>);

// Safety: all access to the storage goes through the one-shot placement
// construction below; afterwards the contents are only reached through the
// constructed singletons, which synchronize themselves.
unsafe impl Sync for ArenaStorage {}

static ARENA: ArenaStorage = ArenaStorage(UnsafeCell::new([0; REQUIRED_BYTES]));

static PLATFORM: Mutex<Crs, Cell<Option<&'static dyn Platform>>> =
    Mutex::new(Cell::new(None));

/// Install the platform adapter. Must run before the first singleton
/// access; calling it again replaces the adapter for singletons not yet
/// constructed.
pub fn init(platform: &'static dyn Platform) {
    PLATFORM.lock(|cell| cell.set(Some(platform)));
    #[cfg(feature = "events")]
    watchdog().set_timeout_hook(forward_watchdog_timeout);
}

/// The installed platform adapter
pub fn platform() -> &'static dyn Platform {
    unwrap!(
        PLATFORM.lock(Cell::get),
        "runtime::init must be called before using the runtime"
    )
}

pub const fn arena_size() -> usize {
    REQUIRED_BYTES
}

pub const fn layout() -> crate::memory::Layout {
    LAYOUT
}

/// Base pointer and length of the user-reserved `os` region
pub fn os_region() -> (*mut u8, usize) {
    (arena_ptr(LAYOUT.os.offset), LAYOUT.os.size)
}

fn arena_ptr(offset: usize) -> *mut u8 {
    // In-bounds: every offset handed in comes from the computed layout
    unsafe { (ARENA.0.get() as *mut u8).add(offset) }
}

/// One-shot placement construction of a region singleton.
///
/// Safety: `ptr` must point into the arena at this singleton's slot, be
/// properly aligned, and be paired with the same `ready` flag on every
/// call.
unsafe fn init_once<T>(ptr: *mut T, ready: &AtomicBool, make: impl FnOnce() -> T) -> &'static T {
    if !ready.load(Ordering::Acquire) {
        critical_section::with(|_| {
            if !ready.load(Ordering::Relaxed) {
                unsafe { ptr.write(make()) };
                ready.store(true, Ordering::Release);
            }
        });
    }
    unsafe { &*ptr }
}

macro_rules! region_singleton {
    ($(#[$meta:meta])* $vis:vis fn $name:ident() -> $ty:ty {
        region: $region:expr, offset: $offset:expr, make: $make:expr
    }) => {
        $(#[$meta])*
        $vis fn $name() -> &'static $ty {
            static READY: AtomicBool = AtomicBool::new(false);
            let ptr = arena_ptr($region.offset + $offset) as *mut $ty;
            // Safety: the layout reserves this slot for exactly this type
            unsafe { init_once(ptr, &READY, $make) }
        }
    };
}

#[cfg(feature = "messaging")]
region_singleton! {
    /// The medium-message broker
    pub fn medium_broker() -> MediumBroker {
        region: LAYOUT.messaging, offset: offsets::MEDIUM_BROKER,
        make: || MediumBroker::new(platform())
    }
}

#[cfg(feature = "small-broker")]
region_singleton! {
    /// The small-message broker carrying ACKs and coordination traffic
    pub fn small_broker() -> SmallBroker {
        region: LAYOUT.messaging, offset: offsets::SMALL_BROKER,
        make: || SmallBroker::new(platform())
    }
}

#[cfg(feature = "zc")]
region_singleton! {
    /// The zero-copy payload pool
    pub fn zc_pool() -> ZcBlockPool {
        region: LAYOUT.messaging, offset: offsets::ZC_POOL,
        make: ZcBlockPool::new
    }
}

#[cfg(feature = "zc")]
region_singleton! {
    /// The broker routing zero-copy envelopes
    pub fn zc_broker() -> ZcBroker {
        region: LAYOUT.messaging, offset: offsets::ZC_BROKER,
        make: || ZcBroker::new(platform())
    }
}

#[cfg(feature = "event-log")]
region_singleton! {
    /// Append-only trace of medium messages
    pub fn message_trace() -> MessageTrace {
        region: LAYOUT.messaging, offset: offsets::MESSAGE_TRACE,
        make: MessageTrace::new
    }
}

#[cfg(feature = "events")]
region_singleton! {
    /// The system event bus
    pub fn event_bus() -> SystemEventBus {
        region: LAYOUT.events, offset: offsets::EVENT_BUS,
        make: SystemEventBus::new
    }
}

region_singleton! {
    /// The task manager
    pub fn task_manager() -> SystemTaskManager {
        region: LAYOUT.tasks, offset: offsets::TASK_MANAGER,
        make: || SystemTaskManager::new(platform())
    }
}

region_singleton! {
    /// The task watchdog
    pub fn watchdog() -> SystemWatchdog {
        region: LAYOUT.tasks, offset: offsets::WATCHDOG,
        make: || SystemWatchdog::new(platform())
    }
}

region_singleton! {
    /// The execution monitor driven by the native-task trampoline
    pub fn exec_monitor() -> SystemExecMonitor {
        region: LAYOUT.tasks, offset: offsets::EXEC_MONITOR,
        make: || SystemExecMonitor::new(platform())
    }
}

#[cfg(feature = "protocol")]
region_singleton! {
    /// The packet pipeline with its field codec
    pub fn protocol() -> ProtocolEngine {
        region: LAYOUT.protocol, offset: offsets::PROTOCOL_ENGINE,
        make: ProtocolEngine::new
    }
}

#[cfg(feature = "diagnostics")]
region_singleton! {
    /// The task profiler
    pub fn profiler() -> SystemProfiler {
        region: LAYOUT.diagnostics, offset: offsets::PROFILER,
        make: || SystemProfiler::new(platform())
    }
}

#[cfg(feature = "diagnostics")]
region_singleton! {
    /// The health monitor
    pub fn health_monitor() -> SystemHealthMonitor {
        region: LAYOUT.diagnostics, offset: offsets::HEALTH_MONITOR,
        make: || SystemHealthMonitor::new(platform())
    }
}

#[cfg(feature = "pools")]
region_singleton! {
    /// The size-class block pools
    pub fn memory_manager() -> SystemMemoryManager {
        region: LAYOUT.pools, offset: offsets::MEMORY_MANAGER,
        make: SystemMemoryManager::new
    }
}

#[cfg(feature = "events")]
fn forward_watchdog_timeout(task: crate::core::TaskId, _count: u32) {
    use crate::event::{codes, Event, EventCategory, EventPayload, Severity};
    let event = Event::new(EventCategory::Task, codes::WATCHDOG_TIMEOUT)
        .with_severity(Severity::Critical)
        .with_payload(EventPayload::U32(u32::from(task.into_u16())));
    let _ = event_bus().post(event);
}

/// Protocol pipeline, field encoder and field decoder behind one lock
pub struct ProtocolEngine {
    inner: Mutex<Crs, RefCell<ProtocolParts>>,
}

pub struct ProtocolParts {
    pub pipeline: PacketPipeline<
        DefaultFrame,
        { config::PROTOCOL_RING_SIZE },
        { config::PROTOCOL_MAX_PAYLOAD },
        { config::PROTOCOL_MAX_HANDLERS },
    >,
    pub encoder:
        FieldEncoder<DefaultFrame, { config::PROTOCOL_MAX_FIELDS }, { config::PROTOCOL_OPCODE_SPACE }>,
    pub decoder: FieldDecoder<{ config::PROTOCOL_MAX_FIELDS }, { config::PROTOCOL_OPCODE_SPACE }>,
}

impl ProtocolEngine {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(ProtocolParts {
                pipeline: PacketPipeline::new(),
                encoder: FieldEncoder::new(),
                decoder: FieldDecoder::new(),
            })),
        }
    }

    /// Access the engine under its lock
    pub fn with<R>(&self, f: impl FnOnce(&mut ProtocolParts) -> R) -> R {
        self.inner.lock(|cell| f(&mut *cell.borrow_mut()))
    }

    /// Driver/ISR side: store one received byte
    pub fn feed_byte(&self, byte: u8) -> bool {
        self.with(|parts| parts.pipeline.feed_byte(byte))
    }

    /// Driver/ISR side: store received bytes, returning the number stored
    pub fn feed_bytes(&self, data: &[u8]) -> usize {
        self.with(|parts| parts.pipeline.feed_bytes(data))
    }

    /// Task side: parse and dispatch up to `max_packets`
    pub fn process_available(&self, max_packets: usize) -> usize {
        self.with(|parts| parts.pipeline.process_available(max_packets))
    }

    /// Task side: consume at most `max_bytes`, reporting dispatched packets
    pub fn process_bytes(&self, max_bytes: usize, packets_out: &mut usize) -> usize {
        self.with(|parts| parts.pipeline.process_bytes(max_bytes, packets_out))
    }

    /// Number of registered command handlers
    pub fn handler_count(&self) -> usize {
        self.with(|parts| parts.pipeline.dispatcher().len())
    }
}
