//! Fixed-size block pools with free-list allocation
//!
//! Three size classes (small/medium/large) behind a routing manager.
//! Allocations are opaque block handles; payload access runs under the
//! pool lock through a closure, keeping the blocks inside the pool's
//! storage. Deallocation verifies the handle and detects double frees.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config;
use crate::core::{Error, Result};

const NO_BLOCK: u16 = 0xffff;

#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    size: u16,
    is_free: bool,
    next: u16,
}

struct PoolInner<const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    storage: [[u8; BLOCK_SIZE]; BLOCK_COUNT],
    headers: [BlockHeader; BLOCK_COUNT],
    free_head: u16,
    allocated: usize,
}

pub struct MemoryPool<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> {
    inner: Mutex<M, RefCell<PoolInner<BLOCK_SIZE, BLOCK_COUNT>>>,
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize>
    MemoryPool<M, BLOCK_SIZE, BLOCK_COUNT>
{
    pub fn new() -> Self {
        const { assert!(BLOCK_SIZE > 0 && BLOCK_COUNT > 0 && BLOCK_COUNT < NO_BLOCK as usize) };
        Self {
            inner: Mutex::new(RefCell::new(PoolInner {
                storage: [[0; BLOCK_SIZE]; BLOCK_COUNT],
                headers: core::array::from_fn(|i| BlockHeader {
                    size: BLOCK_SIZE as u16,
                    is_free: true,
                    next: if i + 1 < BLOCK_COUNT {
                        (i + 1) as u16
                    } else {
                        NO_BLOCK
                    },
                }),
                free_head: 0,
                allocated: 0,
            })),
        }
    }

    /// Take the first free block; `None` when `size` exceeds the block
    /// size or the pool is exhausted.
    pub fn allocate(&self, size: usize) -> Option<u16> {
        if size > BLOCK_SIZE {
            return None;
        }
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            if inner.free_head == NO_BLOCK {
                return None;
            }
            let index = inner.free_head;
            let header = &mut inner.headers[index as usize];
            inner.free_head = header.next;
            header.is_free = false;
            header.next = NO_BLOCK;
            header.size = size as u16;
            inner.allocated += 1;
            Some(index)
        })
    }

    /// Return a block to the free list. Fails on an out-of-range handle
    /// and on double free.
    pub fn deallocate(&self, index: u16) -> Result<()> {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            let free_head = inner.free_head;
            let header = inner
                .headers
                .get_mut(index as usize)
                .ok_or(Error::InvalidParameter)?;
            if header.is_free {
                return Err(Error::InvalidParameter);
            }
            header.is_free = true;
            header.next = free_head;
            inner.free_head = index;
            inner.allocated -= 1;
            Ok(())
        })
    }

    /// Access an allocated block's bytes under the pool lock
    pub fn with_block<R>(&self, index: u16, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            let header = *inner.headers.get(index as usize)?;
            if header.is_free {
                return None;
            }
            Some(f(&mut inner.storage[index as usize][..header.size as usize]))
        })
    }

    pub fn allocated_count(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().allocated)
    }

    pub fn free_count(&self) -> usize {
        BLOCK_COUNT - self.allocated_count()
    }

    pub fn is_full(&self) -> bool {
        self.allocated_count() == BLOCK_COUNT
    }

    pub const fn block_size() -> usize {
        BLOCK_SIZE
    }

    pub const fn block_count() -> usize {
        BLOCK_COUNT
    }
}

impl<M: RawMutex, const BLOCK_SIZE: usize, const BLOCK_COUNT: usize> Default
    for MemoryPool<M, BLOCK_SIZE, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

/// Pool size class of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

/// Handle to a block held by the [`MemoryManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Allocation {
    pub class: SizeClass,
    index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryStats {
    pub small_allocated: usize,
    pub small_free: usize,
    pub medium_allocated: usize,
    pub medium_free: usize,
    pub large_allocated: usize,
    pub large_free: usize,
}

/// Routes allocations to the smallest size class that fits
pub struct MemoryManager<M: RawMutex> {
    small: MemoryPool<M, { config::SMALL_BLOCK_SIZE }, { config::SMALL_POOL_COUNT }>,
    medium: MemoryPool<M, { config::MEDIUM_BLOCK_SIZE }, { config::MEDIUM_POOL_COUNT }>,
    large: MemoryPool<M, { config::LARGE_BLOCK_SIZE }, { config::LARGE_POOL_COUNT }>,
}

impl<M: RawMutex> MemoryManager<M> {
    pub fn new() -> Self {
        Self {
            small: MemoryPool::new(),
            medium: MemoryPool::new(),
            large: MemoryPool::new(),
        }
    }

    /// `None` when the class pool is exhausted or `size` exceeds the
    /// largest block
    pub fn allocate(&self, size: usize) -> Option<Allocation> {
        if size <= config::SMALL_BLOCK_SIZE {
            self.small.allocate(size).map(|index| Allocation {
                class: SizeClass::Small,
                index,
            })
        } else if size <= config::MEDIUM_BLOCK_SIZE {
            self.medium.allocate(size).map(|index| Allocation {
                class: SizeClass::Medium,
                index,
            })
        } else if size <= config::LARGE_BLOCK_SIZE {
            self.large.allocate(size).map(|index| Allocation {
                class: SizeClass::Large,
                index,
            })
        } else {
            None
        }
    }

    pub fn deallocate(&self, allocation: Allocation) -> Result<()> {
        match allocation.class {
            SizeClass::Small => self.small.deallocate(allocation.index),
            SizeClass::Medium => self.medium.deallocate(allocation.index),
            SizeClass::Large => self.large.deallocate(allocation.index),
        }
    }

    pub fn with_block<R>(
        &self,
        allocation: Allocation,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        match allocation.class {
            SizeClass::Small => self.small.with_block(allocation.index, f),
            SizeClass::Medium => self.medium.with_block(allocation.index, f),
            SizeClass::Large => self.large.with_block(allocation.index, f),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            small_allocated: self.small.allocated_count(),
            small_free: self.small.free_count(),
            medium_allocated: self.medium.allocated_count(),
            medium_free: self.medium.free_count(),
            large_allocated: self.large.allocated_count(),
            large_free: self.large.free_count(),
        }
    }
}

impl<M: RawMutex> Default for MemoryManager<M> {
    fn default() -> Self {
        Self::new()
    }
}
