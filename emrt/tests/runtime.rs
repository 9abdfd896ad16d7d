//! End-to-end exercise of the arena-resident runtime singletons.
//!
//! The arena is process-global, so everything runs inside one test body.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use emrt::core::{TaskId, Timeout, TopicId};
use emrt::event::{codes, Event, EventCategory, EventId};
use emrt::messaging::MediumMessage;
use emrt::protocol::{fletcher16, FieldType, FieldValue, Packet, PacketParser, FieldSink};
use emrt::runtime;
use emrt::task::{ExecContext, TaskContext, TaskSpec, WatchdogAction};
use emrt_platform::host::HostPlatform;
use emrt_platform::Platform;

const TOPIC: TopicId = TopicId::new(42);
const RECEIVER: TaskId = TaskId::new(0).unwrap();
const NATIVE: u16 = 1;

static NATIVE_RAN: AtomicBool = AtomicBool::new(false);
static PACKETS: AtomicU32 = AtomicU32::new(0);
static WATCHDOG_EVENTS: AtomicU32 = AtomicU32::new(0);

fn native_fn(ctx: TaskContext) {
    assert_eq!(ctx.task.index(), usize::from(NATIVE));
    NATIVE_RAN.store(true, Ordering::SeqCst);
}

fn packet_handler(packet: &Packet<64>) {
    assert_eq!(packet.opcode, 0x04);
    PACKETS.fetch_add(1, Ordering::SeqCst);
}

fn watchdog_event_handler(event: &Event) {
    assert_eq!(event.ident.code, codes::WATCHDOG_TIMEOUT);
    WATCHDOG_EVENTS.fetch_add(1, Ordering::SeqCst);
}

fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x55, 0xaa, opcode];
    let len = payload.len() as u16;
    bytes.push((len >> 8) as u8);
    bytes.push(len as u8);
    bytes.extend_from_slice(payload);
    let mut body = vec![opcode, (len >> 8) as u8, len as u8];
    body.extend_from_slice(payload);
    let checksum = fletcher16(&body);
    bytes.push((checksum >> 8) as u8);
    bytes.push(checksum as u8);
    bytes
}

#[test]
fn test_runtime_end_to_end() {
    let platform: &'static HostPlatform = Box::leak(Box::new(HostPlatform::new()));
    runtime::init(platform);

    // Layout sanity: populated regions, stable singleton addresses
    assert!(runtime::arena_size() > 0);
    assert!(runtime::layout().messaging.size > 0);
    assert!(core::ptr::eq(runtime::medium_broker(), runtime::medium_broker()));
    assert!(core::ptr::eq(runtime::task_manager(), runtime::task_manager()));
    let (_os_ptr, os_len) = runtime::os_region();
    assert_eq!(os_len, 0);

    // Broker round trip through the arena singleton
    let broker = runtime::medium_broker();
    let handle = platform.register_current_thread();
    broker.register_task(RECEIVER, Some(handle)).unwrap();
    broker.subscribe(TOPIC, RECEIVER).unwrap();
    let mut msg = MediumMessage::with_payload(&[0x11, 0x22]).unwrap();
    broker.publish(TOPIC, &mut msg, TaskId::new(7).unwrap()).unwrap();
    let received = broker.receive(RECEIVER, Timeout::from_ms(100)).unwrap();
    assert_eq!(received.payload(), &[0x11, 0x22]);

    // Small broker coexists in the same region
    runtime::small_broker().register_task(RECEIVER, None).unwrap();

    // Zero-copy: fan out one pool block through the zc broker
    let zc_broker = runtime::zc_broker();
    zc_broker.register_task(RECEIVER, None).unwrap();
    zc_broker.subscribe(TOPIC, RECEIVER).unwrap();
    let mut envelope =
        runtime::ZcEnvelope::with_payload(runtime::zc_pool(), &[9, 9, 9]).unwrap();
    zc_broker
        .publish(TOPIC, &mut envelope, TaskId::new(7).unwrap())
        .unwrap();
    let received = zc_broker.try_receive(RECEIVER).unwrap();
    received
        .handle
        .as_ref()
        .unwrap()
        .with_payload(|bytes| assert_eq!(bytes, &[9, 9, 9]));
    drop(received);
    drop(envelope);
    assert_eq!(runtime::zc_pool().stats().in_use, 0);
    assert!(runtime::zc_pool().check_invariants());

    // Protocol engine: registration, feed, bounded processing, field decode
    let engine = runtime::protocol();
    engine.with(|parts| {
        parts
            .pipeline
            .dispatcher_mut()
            .register_handler(0x04, packet_handler)
            .unwrap();
        parts.decoder.set_layout(0x04, &[FieldType::U16]).unwrap()
    });
    let stream = frame(0x04, &[0xde, 0xad]);
    assert_eq!(engine.feed_bytes(&stream), stream.len());
    assert_eq!(engine.process_available(usize::MAX), 1);
    assert_eq!(PACKETS.load(Ordering::SeqCst), 1);
    assert_eq!(engine.handler_count(), 1);

    struct Word(u16);
    impl FieldSink for Word {
        fn set_field(&mut self, _index: usize, value: FieldValue<'_>) -> bool {
            match value {
                FieldValue::U16(v) => {
                    self.0 = v;
                    true
                }
                _ => false,
            }
        }
    }
    let mut parser: PacketParser<emrt::protocol::DefaultFrame, 64> = PacketParser::new();
    let mut last = None;
    for &byte in &stream {
        if parser.decode(byte) {
            let mut packet = Packet::new();
            parser.get_packet(&mut packet);
            last = Some(packet);
        }
    }
    let mut word = Word(0);
    engine
        .with(|parts| parts.decoder.decode_fields(&last.unwrap(), &mut word))
        .unwrap();
    assert_eq!(word.0, 0xdead);

    // Native task through the trampoline
    let manager = runtime::task_manager();
    manager.initialize().unwrap();
    manager.create_task(&TaskSpec::new("receiver", |_| {})).unwrap();
    runtime::exec_monitor().register_task(TaskId::new(NATIVE).unwrap(), ExecContext::new());
    let mut spec = TaskSpec::new("native", native_fn);
    spec.native = true;
    let native = manager.create_native_task(&spec).unwrap();
    assert_eq!(native.index(), usize::from(NATIVE));

    manager.start_all_tasks();
    for _ in 0..100 {
        if NATIVE_RAN.load(Ordering::SeqCst) {
            break;
        }
        platform.delay_ms(10);
    }
    assert!(NATIVE_RAN.load(Ordering::SeqCst));
    // The one-shot trampoline leaves timing data behind
    let ctx = runtime::exec_monitor().context(native).unwrap();
    assert!(ctx.last_start_us > 0);

    // Watchdog timeouts surface on the event bus
    runtime::event_bus()
        .register_handler(
            EventId::new(EventCategory::Task, codes::WATCHDOG_TIMEOUT),
            watchdog_event_handler,
        )
        .unwrap();
    runtime::watchdog()
        .register_task(RECEIVER, 5, WatchdogAction::LogWarning)
        .unwrap();
    platform.delay_ms(10);
    runtime::watchdog().check_all();
    assert!(runtime::event_bus().process(10) >= 1);
    assert!(WATCHDOG_EVENTS.load(Ordering::SeqCst) >= 1);
    assert_eq!(runtime::watchdog().timeout_count(RECEIVER), 1);

    // Diagnostics and pools singletons
    runtime::profiler().register_task(RECEIVER);
    runtime::profiler().record_execution(RECEIVER, 1500);
    let metrics = runtime::profiler().metrics(RECEIVER).unwrap();
    assert_eq!(metrics.execution_count, 1);
    runtime::health_monitor().update_task(RECEIVER, &metrics);

    let allocation = runtime::memory_manager().allocate(64).unwrap();
    runtime::memory_manager()
        .with_block(allocation, |bytes| bytes.fill(0x5a))
        .unwrap();
    runtime::memory_manager().deallocate(allocation).unwrap();
}
