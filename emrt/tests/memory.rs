use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emrt::memory::{MemoryManager, MemoryPool, SizeClass, LAYOUT, REQUIRED_BYTES};
use emrt::messaging::{ZcMessage, ZeroCopyPool};

type TestPool = MemoryPool<CriticalSectionRawMutex, 32, 4>;
type TestManager = MemoryManager<CriticalSectionRawMutex>;
type TestZcPool = ZeroCopyPool<CriticalSectionRawMutex, 64, 4>;
type TestZcMessage = ZcMessage<CriticalSectionRawMutex, 64, 4>;

#[test]
fn test_pool_allocate_and_free() {
    let pool = TestPool::new();

    let block = pool.allocate(16).unwrap();
    assert_eq!(pool.allocated_count(), 1);
    assert_eq!(pool.free_count(), 3);

    pool.with_block(block, |bytes| {
        assert_eq!(bytes.len(), 16);
        bytes.fill(0xa5);
    })
    .unwrap();
    pool.with_block(block, |bytes| assert_eq!(bytes[0], 0xa5))
        .unwrap();

    pool.deallocate(block).unwrap();
    assert_eq!(pool.allocated_count(), 0);

    // Double free fails; freed blocks are not accessible
    assert!(pool.deallocate(block).is_err());
    assert!(pool.with_block(block, |_| ()).is_none());
}

#[test]
fn test_pool_exhaustion_and_reuse() {
    let pool = TestPool::new();

    let blocks: Vec<u16> = (0..4).map(|_| pool.allocate(32).unwrap()).collect();
    assert!(pool.is_full());
    assert_eq!(pool.allocate(1), None);

    // Oversized requests never fit
    assert_eq!(pool.allocate(33), None);

    pool.deallocate(blocks[2]).unwrap();
    assert_eq!(pool.allocate(8), Some(blocks[2]));
}

#[test]
fn test_pool_rejects_foreign_index() {
    let pool = TestPool::new();
    assert!(pool.deallocate(100).is_err());
}

#[test]
fn test_manager_routes_by_size() {
    let manager = TestManager::new();

    let small = manager.allocate(16).unwrap();
    let medium = manager.allocate(100).unwrap();
    let large = manager.allocate(500).unwrap();
    assert_eq!(small.class, SizeClass::Small);
    assert_eq!(medium.class, SizeClass::Medium);
    assert_eq!(large.class, SizeClass::Large);

    // Beyond the largest class
    assert!(manager.allocate(4096).is_none());

    let stats = manager.stats();
    assert_eq!(stats.small_allocated, 1);
    assert_eq!(stats.medium_allocated, 1);
    assert_eq!(stats.large_allocated, 1);

    manager.with_block(medium, |bytes| assert_eq!(bytes.len(), 100)).unwrap();

    manager.deallocate(small).unwrap();
    manager.deallocate(medium).unwrap();
    manager.deallocate(large).unwrap();
    assert_eq!(manager.stats().small_allocated, 0);
}

#[test]
fn test_layout_regions() {
    let regions = [
        LAYOUT.messaging,
        LAYOUT.events,
        LAYOUT.tasks,
        LAYOUT.os,
        LAYOUT.protocol,
        LAYOUT.diagnostics,
        LAYOUT.pools,
    ];

    // Disjoint, ordered, 8-byte aligned
    let mut cursor = 0;
    for region in regions {
        assert_eq!(region.offset % 8, 0);
        assert!(region.offset >= cursor);
        cursor = region.end();
    }
    assert_eq!(REQUIRED_BYTES % 8, 0);
    assert!(REQUIRED_BYTES >= cursor);

    // With default features every major region is populated
    assert!(LAYOUT.messaging.size > 0);
    assert!(LAYOUT.tasks.size > 0);
    assert!(LAYOUT.protocol.size > 0);
}

// -------- Zero-copy pool --------

fn zc_pool() -> &'static TestZcPool {
    Box::leak(Box::new(TestZcPool::new()))
}

#[test]
fn test_zc_refcount_lifecycle() {
    let pool = zc_pool();
    assert!(pool.check_invariants());

    let mut handle = pool.allocate(5).unwrap();
    assert_eq!(pool.stats().in_use, 1);
    assert!(pool.check_invariants());

    handle.with_payload_mut(|bytes| bytes.copy_from_slice(&[1, 2, 3, 4, 5]));

    let copy = handle.clone();
    // Shared payloads are immutable
    assert!(handle.with_payload_mut(|_| ()).is_none());
    copy.with_payload(|bytes| assert_eq!(bytes, &[1, 2, 3, 4, 5]));

    drop(handle);
    assert_eq!(pool.stats().in_use, 1);
    drop(copy);
    assert_eq!(pool.stats().in_use, 0);
    assert!(pool.check_invariants());
}

#[test]
fn test_zc_exhaustion_and_reuse() {
    let pool = zc_pool();

    let handles: Vec<_> = (0..4).map(|_| pool.allocate(64).unwrap()).collect();
    assert!(pool.allocate(1).is_none());
    assert!(pool.allocate(65).is_none());

    drop(handles);
    assert_eq!(pool.stats().in_use, 0);
    assert!(pool.check_invariants());
    assert!(pool.allocate(64).is_some());
}

#[test]
fn test_zc_envelope_fanout() {
    let pool = zc_pool();

    let msg = TestZcMessage::with_payload(pool, &[0xde, 0xad]).unwrap();
    assert_eq!(msg.payload_size(), 2);

    // Cloning the envelope shares the block instead of copying it
    let fanned: Vec<TestZcMessage> = (0..3).map(|_| msg.clone()).collect();
    assert_eq!(pool.stats().in_use, 1);
    for copy in &fanned {
        copy.handle
            .as_ref()
            .unwrap()
            .with_payload(|bytes| assert_eq!(bytes, &[0xde, 0xad]));
    }

    drop(msg);
    drop(fanned);
    assert_eq!(pool.stats().in_use, 0);
    assert!(pool.check_invariants());
}
