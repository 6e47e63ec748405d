use std::{mem, ptr::NonNull};

use crate::{
    arena::Id,
    pool::PoolId,
    utils::ALLOCATION_ALIGNMENT,
};

pub(crate) type BlockId = Id<BlockDescriptor>;

/// Bytes reserved in front of every block's user memory for its [`BlockHeader`],
/// rounded to the allocation boundary so the user memory stays aligned.
pub(crate) const BLOCK_HEADER_SIZE: usize =
    mem::size_of::<BlockHeader>().next_multiple_of(ALLOCATION_ALIGNMENT);

const _: () = assert!(mem::align_of::<BlockHeader>() <= ALLOCATION_ALIGNMENT);

/// Whether a block currently holds a live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free,
    Occupied,
}

/// This is the structure of a block descriptor. The descriptor itself lives in
/// the allocator's arena; the pool memory only carries a small [`BlockHeader`]
/// naming it, placed right before the user memory.
///
/// ```text
/// +---------------------+ <------+
/// |   BlockHeader       |        | -> BLOCK_HEADER_SIZE bytes
/// |   (descriptor id)   |        |
/// +---------------------+ <------+ <--- `data`, `offset`
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `left` and `right` link the physically adjacent blocks of the same pool in
/// address order.
#[derive(Debug)]
pub(crate) struct BlockDescriptor {
    pub state: BlockState,
    /// Blocks of large pools never merge with anything.
    pub coalescable: bool,
    pub left: Option<BlockId>,
    pub right: Option<BlockId>,
    /// Pool which the block belongs to.
    pub pool: PoolId,
    /// Start of the user memory.
    pub data: NonNull<u8>,
    /// Byte offset of `data` from the start of the pool's usable region.
    pub offset: usize,
    /// Bytes available to the user, excluding the header.
    pub size: usize,
}

impl BlockDescriptor {
    #[inline]
    pub(crate) fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// A free block that may be merged with or carved by ordinary requests.
    #[inline]
    pub(crate) fn is_mergeable(&self) -> bool {
        self.is_free() && self.coalescable
    }

    /// First byte past the user memory.
    #[inline]
    pub(crate) fn end_offset(&self) -> usize {
        self.offset + self.size
    }
}

/// The part of a block that lives inside the pool, right before `data`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct BlockHeader {
    pub block: BlockId,
}

impl BlockHeader {
    /// Writes the header of `block` in front of `data`.
    ///
    /// **SAFETY**: `data` must be preceded by [`BLOCK_HEADER_SIZE`] writable
    /// bytes aligned to [`ALLOCATION_ALIGNMENT`].
    #[inline]
    pub(crate) unsafe fn write(data: NonNull<u8>, block: BlockId) {
        unsafe {
            data.sub(BLOCK_HEADER_SIZE)
                .cast::<Self>()
                .write(Self { block });
        }
    }

    /// Reads the header placed in front of `data`.
    ///
    /// **SAFETY**: same requirements as [`BlockHeader::write`], readable
    /// instead of writable. The contents may be stale, so the returned id must
    /// be validated before it's trusted.
    #[inline]
    pub(crate) unsafe fn read(data: NonNull<u8>) -> Self {
        unsafe { data.sub(BLOCK_HEADER_SIZE).cast::<Self>().read() }
    }
}
