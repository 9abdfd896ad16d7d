//! Static memory: arena layout and fixed block pools

pub mod layout;
pub mod pool;

pub use layout::{Layout, Region, LAYOUT, REQUIRED_BYTES};
pub use pool::{Allocation, MemoryManager, MemoryPool, MemoryStats, SizeClass};
