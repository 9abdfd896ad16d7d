//! Zero-copy messaging support
//!
//! Payloads live in a refcounted block pool; envelopes carry a handle
//! instead of inline bytes, so fan-out to several mailboxes clones a
//! handle, not the payload. A block returns to the free list when the last
//! handle drops. Payload access runs under the pool lock; keep accessors
//! short.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::types::{Envelope, MessageHeader};

const NO_BLOCK: u16 = 0xffff;

struct Node<const BLOCK_SIZE: usize> {
    payload: [u8; BLOCK_SIZE],
    size: u16,
    refs: u16,
    next: u16,
    in_use: bool,
}

struct PoolInner<const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    nodes: [Node<BLOCK_SIZE>; BLOCK_COUNT],
    free_head: u16,
}

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ZeroCopyStats {
    pub in_use: usize,
    pub capacity: usize,
}

pub struct ZeroCopyPool<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    inner: Mutex<M, RefCell<PoolInner<BLOCK_SIZE, BLOCK_COUNT>>>,
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    ZeroCopyPool<M, BLOCK_SIZE, BLOCK_COUNT>
{
    pub fn new() -> Self {
        const { assert!(BLOCK_COUNT > 0 && BLOCK_COUNT < NO_BLOCK as usize) };
        Self {
            inner: Mutex::new(RefCell::new(PoolInner {
                nodes: core::array::from_fn(|i| Node {
                    payload: [0; BLOCK_SIZE],
                    size: 0,
                    refs: 0,
                    next: if i + 1 < BLOCK_COUNT {
                        (i + 1) as u16
                    } else {
                        NO_BLOCK
                    },
                    in_use: false,
                }),
                free_head: 0,
            })),
        }
    }

    /// Take a block of at least `size` bytes. The returned handle holds the
    /// first reference.
    pub fn allocate(
        &'static self,
        size: u16,
    ) -> Option<ZcHandle<M, BLOCK_SIZE, BLOCK_COUNT>> {
        if size as usize > BLOCK_SIZE {
            return None;
        }
        let index = self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            if inner.free_head == NO_BLOCK {
                return None;
            }
            let index = inner.free_head;
            let node = &mut inner.nodes[index as usize];
            inner.free_head = node.next;
            node.size = size;
            node.refs = 1;
            node.in_use = true;
            node.next = NO_BLOCK;
            Some(index)
        })?;
        Some(ZcHandle {
            pool: self,
            index,
            size,
        })
    }

    pub fn stats(&self) -> ZeroCopyStats {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            ZeroCopyStats {
                in_use: inner.nodes.iter().filter(|n| n.in_use).count(),
                capacity: BLOCK_COUNT,
            }
        })
    }

    /// Check the block invariants: `in_use ⇔ refs > 0`, and a block sits on
    /// the free list iff it is not in use.
    pub fn check_invariants(&self) -> bool {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            for node in inner.nodes.iter() {
                if node.in_use != (node.refs > 0) {
                    return false;
                }
            }
            let mut on_free_list = [false; BLOCK_COUNT];
            let mut cursor = inner.free_head;
            let mut hops = 0;
            while cursor != NO_BLOCK {
                if hops > BLOCK_COUNT {
                    return false;
                }
                on_free_list[cursor as usize] = true;
                cursor = inner.nodes[cursor as usize].next;
                hops += 1;
            }
            inner
                .nodes
                .iter()
                .zip(on_free_list)
                .all(|(node, free)| node.in_use != free)
        })
    }

    fn add_ref(&self, index: u16) {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            if let Some(node) = inner.nodes.get_mut(index as usize) {
                if node.in_use && node.refs != u16::MAX {
                    node.refs += 1;
                }
            }
        });
    }

    fn release(&self, index: u16) {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            let free_head = inner.free_head;
            if let Some(node) = inner.nodes.get_mut(index as usize) {
                if node.in_use && node.refs > 0 {
                    node.refs -= 1;
                    if node.refs == 0 {
                        node.in_use = false;
                        node.next = free_head;
                        inner.free_head = index;
                    }
                }
            }
        });
    }

    fn with_payload<R>(&self, index: u16, size: u16, f: impl FnOnce(&[u8]) -> R) -> R {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            f(&inner.nodes[index as usize].payload[..size as usize])
        })
    }

    fn with_payload_mut<R>(
        &self,
        index: u16,
        size: u16,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            let node = &mut inner.nodes[index as usize];
            // Mutation is only sound while the handle is unique
            if node.refs != 1 {
                return None;
            }
            Some(f(&mut node.payload[..size as usize]))
        })
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Default
    for ZeroCopyPool<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

/// Refcounted handle to a pool block
pub struct ZcHandle<M: RawMutex + 'static, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    pool: &'static ZeroCopyPool<M, BLOCK_SIZE, BLOCK_COUNT>,
    index: u16,
    size: u16,
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    ZcHandle<M, BLOCK_SIZE, BLOCK_COUNT>
{
    pub fn size(&self) -> u16 {
        self.size
    }

    /// Read the payload under the pool lock
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.pool.with_payload(self.index, self.size, f)
    }

    /// Mutate the payload under the pool lock. `None` once the handle has
    /// been cloned: shared payloads are immutable.
    pub fn with_payload_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        self.pool.with_payload_mut(self.index, self.size, f)
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Clone
    for ZcHandle<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn clone(&self) -> Self {
        self.pool.add_ref(self.index);
        Self {
            pool: self.pool,
            index: self.index,
            size: self.size,
        }
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Drop
    for ZcHandle<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Message envelope whose payload lives in a [`ZeroCopyPool`]
pub struct ZcMessage<M: RawMutex + 'static, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    pub header: MessageHeader,
    pub handle: Option<ZcHandle<M, BLOCK_SIZE, BLOCK_COUNT>>,
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Clone
    for ZcMessage<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn clone(&self) -> Self {
        Self {
            header: self.header,
            handle: self.handle.clone(),
        }
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    ZcMessage<M, BLOCK_SIZE, BLOCK_COUNT>
{
    pub fn new() -> Self {
        Self {
            header: MessageHeader::new(),
            handle: None,
        }
    }

    /// Allocate a block from `pool` and fill it with `data`
    pub fn with_payload(
        pool: &'static ZeroCopyPool<M, BLOCK_SIZE, BLOCK_COUNT>,
        data: &[u8],
    ) -> Option<Self> {
        let mut handle = pool.allocate(data.len() as u16)?;
        handle.with_payload_mut(|payload| payload.copy_from_slice(data))?;
        let mut msg = Self::new();
        msg.header.payload_size = data.len() as u16;
        msg.handle = Some(handle);
        Some(msg)
    }

    pub fn payload_size(&self) -> u16 {
        self.handle.as_ref().map_or(0, ZcHandle::size)
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Default
    for ZcMessage<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Envelope
    for ZcMessage<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }
}
