//! # poolalloc - a pool-based heap allocator
//!
//! The allocator reserves large regions from the operating system, called
//! pools, and carves them into blocks. Every block is prefixed by a small
//! header, and the blocks of a pool are linked in address order so freed
//! neighbours can be merged back together.
//!
//! ```text
//! +-----------------------------------------------------+
//! | Pool    | +-------+    +------+    +--------------+ |
//! | header  | | Block | <> | Free | <> |  Tail (free) | |  <--> next pool ...
//! |         | +-------+    +------+    +--------------+ |
//! +-----------------------------------------------------+
//! ```
//!
//! The free block at the end of a pool is its *tail*. Allocations are carved
//! from the front of a free block, so the tail is the cheapest place to grow
//! into. Two search strategies are available, see [`FitStrategy`].
//!
//! Usage is three operations on an [`Allocator`] value:
//!
//! ```
//! use poolalloc::{Allocator, kilobytes};
//!
//! let mut allocator = Allocator::new();
//! allocator.reserve(kilobytes(256));
//!
//! let ptr = allocator.allocate(100);
//! unsafe { ptr.as_ptr().write_bytes(0xAB, 100) };
//!
//! allocator.free(ptr.as_ptr()).unwrap();
//! ```
//!
//! The allocator is single threaded. Wrap it in a [`LockedAllocator`] to share
//! it between threads.

mod allocator;
mod arena;
mod block;
mod coalesce;
mod config;
mod error;
mod fit;
mod kernel;
mod ledger;
mod locked;
mod pool;
mod stats;
mod utils;

pub use allocator::Allocator;
pub use config::AllocatorConfig;
pub use error::{AllocError, CorruptionError, InvalidFreeReason, VmError};
pub use fit::FitStrategy;
pub use kernel::{Kernel, PlatformMemory};
pub use locked::LockedAllocator;
pub use stats::{AllocatorStats, PoolStats};
pub use utils::{
    ALLOCATION_ALIGNMENT, DEFAULT_INITIAL_POOL_SIZE, DEFAULT_LARGE_THRESHOLD,
    MINIMUM_ALLOCATION_SIZE, MINIMUM_PAGES_PER_POOL, bytes, gigabytes, kilobytes, megabytes,
    terabytes,
};
