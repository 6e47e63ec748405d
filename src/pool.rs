use std::{mem, ptr::NonNull};

use snafu::{OptionExt as _, ResultExt as _};

use crate::{
    arena::Id,
    block::{BLOCK_HEADER_SIZE, BlockDescriptor, BlockHeader, BlockId, BlockState},
    error::{AllocError, ReservationSnafu, SizeOverflowSnafu},
    kernel::PlatformMemory,
    ledger::Ledger,
    utils::{ALLOCATION_ALIGNMENT, minimum_pool_size},
};

pub(crate) type PoolId = Id<Pool>;

/// This is the overhead size introduced by the [`PoolHeader`] in bytes,
/// rounded so the usable region starts on an allocation boundary.
pub(crate) const POOL_HEADER_SIZE: usize =
    mem::size_of::<PoolHeader>().next_multiple_of(ALLOCATION_ALIGNMENT);

const _: () = assert!(mem::align_of::<PoolHeader>() <= ALLOCATION_ALIGNMENT);

/// This struct contains the pool specific metadata.
///
/// The operating system gives us regions aligned with the computer's
/// granularity. We cannot use a full region each time the user allocates
/// memory since we would be wasting a lot of space, and we cannot assume
/// regions are adjacent either. So every region becomes a pool which is split
/// into blocks, and pools are chained into a list.
///
/// ```text
/// +-----------------------------------------------+      +-----------------------------------------------+
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// |  Pool  | | Block | <> | Block | <> | Tail  |  | <--> |  Pool  | | Block | <> | Block | <> | Tail  |  |
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
/// +-----------------------------------------------+      +-----------------------------------------------+
/// ```
#[derive(Debug)]
pub(crate) struct Pool {
    pub prev: Option<PoolId>,
    pub next: Option<PoolId>,
    /// Start of the region returned by [`PlatformMemory::reserve`].
    pub base: NonNull<u8>,
    /// Bytes reserved from the provider, header included.
    pub reserved: usize,
    /// Start of the usable region, right after the [`PoolHeader`].
    pub memory: NonNull<u8>,
    /// Size of the usable region.
    pub size: usize,
    /// Occupied user bytes plus every block header in the pool.
    pub occupancy: usize,
    /// Lowest-address block. Merges always keep the left descriptor, so this
    /// never changes.
    pub first: BlockId,
    /// Free block at the end of the region, or `None` while the right-most
    /// block is occupied.
    pub tail: Option<BlockId>,
    /// Pool dedicated to a single oversized allocation.
    pub is_large: bool,
}

impl Pool {
    /// Sum of the sizes of all free blocks.
    #[inline]
    pub(crate) fn free_bytes(&self) -> usize {
        self.size - self.occupancy
    }

    #[inline]
    pub(crate) fn contains(&self, addr: usize) -> bool {
        let start = self.memory.as_ptr() as usize;
        addr >= start && addr < start + self.size
    }
}

/// Written at the very start of every pool region.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct PoolHeader {
    pub pool: PoolId,
    pub reserved: usize,
}

impl PoolHeader {
    /// **SAFETY**: `base` must be the start of a live pool region.
    #[inline]
    pub(crate) unsafe fn read(base: NonNull<u8>) -> Self {
        unsafe { base.cast::<Self>().read() }
    }
}

impl Ledger {
    /// Reserves a new pool able to hold at least `requested` bytes, headers
    /// included, and returns it detached from the pool list.
    ///
    /// The pool starts with a single free block spanning the whole usable
    /// region. That block is the pool's tail.
    pub(crate) fn create_pool<M: PlatformMemory>(
        &mut self,
        memory: &M,
        requested: usize,
        is_large: bool,
    ) -> Result<PoolId, AllocError> {
        let granularity = memory.granularity();
        let reserved = minimum_pool_size(requested, granularity)
            .context(SizeOverflowSnafu { size: requested })?;

        let base = memory
            .reserve(reserved)
            .context(ReservationSnafu {
                size: reserved,
                granularity,
            })?;

        assert!(
            base.as_ptr() as usize % ALLOCATION_ALIGNMENT == 0,
            "provider returned a region misaligned for allocations"
        );

        let pool = self.pools.next_id();
        let size = reserved - POOL_HEADER_SIZE;

        unsafe {
            base.cast::<PoolHeader>().write(PoolHeader { pool, reserved });

            let region = base.add(POOL_HEADER_SIZE);
            let data = region.add(BLOCK_HEADER_SIZE);

            let block = self.blocks.insert(BlockDescriptor {
                state: BlockState::Free,
                coalescable: !is_large,
                left: None,
                right: None,
                pool,
                data,
                offset: BLOCK_HEADER_SIZE,
                size: size - BLOCK_HEADER_SIZE,
            });
            BlockHeader::write(data, block);

            let inserted = self.pools.insert(Pool {
                prev: None,
                next: None,
                base,
                reserved,
                memory: region,
                size,
                occupancy: BLOCK_HEADER_SIZE,
                first: block,
                tail: Some(block),
                is_large,
            });
            debug_assert_eq!(inserted, pool);
        }

        log::debug!(
            "created pool {pool:?}: {reserved} bytes reserved, {size} usable, large: {is_large}"
        );

        Ok(pool)
    }

    /// Links a detached pool after the current last pool.
    pub(crate) fn append_pool(&mut self, pool: PoolId) {
        self.pools[pool].prev = self.tail;
        self.pools[pool].next = None;

        match self.tail {
            Some(tail) => self.pools[tail].next = Some(pool),
            None => self.head = Some(pool),
        }

        self.tail = Some(pool);
    }
}
