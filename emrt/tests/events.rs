use std::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emrt::core::Error;
use emrt::event::{
    Event, EventBus, EventCategory, EventId, EventPayload, Severity, WILDCARD_CODE,
};

type TestBus = EventBus<CriticalSectionRawMutex, 4, 4>;

static EXACT_HITS: AtomicU32 = AtomicU32::new(0);
static WILDCARD_HITS: AtomicU32 = AtomicU32::new(0);
static CHAIN_HITS: AtomicU32 = AtomicU32::new(0);

fn exact_handler(event: &Event) {
    assert_eq!(event.ident.code, 7);
    EXACT_HITS.fetch_add(1, Ordering::SeqCst);
}

fn wildcard_handler(_event: &Event) {
    WILDCARD_HITS.fetch_add(1, Ordering::SeqCst);
}

fn chain_handler(_event: &Event) {
    CHAIN_HITS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_post_process_and_matching() {
    let bus = TestBus::new();
    EXACT_HITS.store(0, Ordering::SeqCst);
    WILDCARD_HITS.store(0, Ordering::SeqCst);

    bus.register_handler(EventId::new(EventCategory::Sensor, 7), exact_handler)
        .unwrap();
    bus.register_handler(
        EventId::new(EventCategory::Any, WILDCARD_CODE),
        wildcard_handler,
    )
    .unwrap();

    bus.post(
        Event::new(EventCategory::Sensor, 7)
            .with_severity(Severity::Warn)
            .with_payload(EventPayload::U32(123)),
    )
    .unwrap();
    bus.post(Event::new(EventCategory::Power, 9)).unwrap();
    assert_eq!(bus.pending(), 2);

    assert_eq!(bus.process(10), 2);
    assert_eq!(bus.pending(), 0);
    assert_eq!(EXACT_HITS.load(Ordering::SeqCst), 1);
    assert_eq!(WILDCARD_HITS.load(Ordering::SeqCst), 2);
}

#[test]
fn test_process_is_bounded() {
    let bus = TestBus::new();
    WILDCARD_HITS.store(0, Ordering::SeqCst);
    bus.register_handler(
        EventId::new(EventCategory::Any, WILDCARD_CODE),
        wildcard_handler,
    )
    .unwrap();

    for code in 0..3 {
        bus.post(Event::new(EventCategory::User, code)).unwrap();
    }
    assert_eq!(bus.process(2), 2);
    assert_eq!(bus.pending(), 1);
    assert_eq!(bus.process(usize::MAX), 1);
}

#[test]
fn test_queue_overflow() {
    let bus = TestBus::new();
    for code in 0..4 {
        bus.post(Event::new(EventCategory::User, code)).unwrap();
    }
    assert_eq!(
        bus.post(Event::new(EventCategory::User, 9)),
        Err(Error::OutOfMemory)
    );
}

#[test]
fn test_handler_table_capacity_and_unregister() {
    let bus = TestBus::new();
    for code in 0..4 {
        bus.register_handler(EventId::new(EventCategory::User, code), wildcard_handler)
            .unwrap();
    }
    assert_eq!(
        bus.register_handler(EventId::new(EventCategory::User, 9), wildcard_handler),
        Err(Error::OutOfMemory)
    );
    assert_eq!(bus.active_handlers(), 4);

    bus.unregister_handler(EventId::new(EventCategory::User, 2))
        .unwrap();
    assert_eq!(
        bus.unregister_handler(EventId::new(EventCategory::User, 2)),
        Err(Error::NotFound)
    );
    assert_eq!(bus.active_handlers(), 3);
}

#[test]
fn test_dispatch_bypasses_queue() {
    let bus = TestBus::new();
    CHAIN_HITS.store(0, Ordering::SeqCst);

    bus.register_handler(EventId::new(EventCategory::Timer, 1), chain_handler)
        .unwrap();

    // Immediate dispatch runs handlers without touching the queue
    bus.dispatch(&Event::new(EventCategory::Timer, 1));
    assert_eq!(bus.pending(), 0);
    assert_eq!(CHAIN_HITS.load(Ordering::SeqCst), 1);

    bus.post(Event::new(EventCategory::Timer, 1)).unwrap();
    assert_eq!(bus.process(10), 1);
    assert_eq!(CHAIN_HITS.load(Ordering::SeqCst), 2);
}
