use std::ptr::NonNull;

use snafu::ensure;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockHeader, BlockId, BlockState},
    error::{AllocError, InvalidFreeReason, InvalidFreeSnafu},
    ledger::Ledger,
    utils::ALLOCATION_ALIGNMENT,
};

impl Ledger {
    /// Finds the occupied block whose user memory starts at `ptr`.
    ///
    /// Nothing is trusted: the pointer must fall inside one of our pools, sit
    /// on an allocation boundary, and the header in front of it must name a
    /// live descriptor describing exactly that address.
    pub(crate) fn occupied_block(&self, ptr: NonNull<u8>) -> Result<BlockId, AllocError> {
        let address = ptr.as_ptr() as usize;
        let invalid = |reason| InvalidFreeSnafu { address, reason };

        let pool_id = self
            .pool_containing(address)
            .ok_or_else(|| invalid(InvalidFreeReason::NotOwned).build())?;
        let pool = &self.pools[pool_id];
        let offset = address - pool.memory.as_ptr() as usize;

        ensure!(
            offset >= BLOCK_HEADER_SIZE && offset.is_multiple_of(ALLOCATION_ALIGNMENT),
            invalid(InvalidFreeReason::Misaligned)
        );

        // SAFETY: `offset` is at least one header into the pool's region.
        let header = unsafe { BlockHeader::read(ptr) };
        let block = self
            .blocks
            .get(header.block)
            .filter(|block| block.pool == pool_id && block.data == ptr)
            .ok_or_else(|| invalid(InvalidFreeReason::NotOwned).build())?;

        ensure!(
            block.state == BlockState::Occupied,
            invalid(InvalidFreeReason::NotOccupied)
        );

        Ok(header.block)
    }

    /// Marks the occupied block at `ptr` as free and merges it with its free
    /// neighbours. Returns the block that now covers the freed memory.
    pub(crate) fn release(&mut self, ptr: NonNull<u8>) -> Result<BlockId, AllocError> {
        let block = self.occupied_block(ptr)?;
        let pool = self.blocks[block].pool;
        let size = self.blocks[block].size;

        self.blocks[block].state = BlockState::Free;
        assert!(
            self.pools[pool].occupancy >= size + BLOCK_HEADER_SIZE,
            "pool {pool:?} occupancy underflow"
        );
        self.pools[pool].occupancy -= size;

        log::trace!("freed {block:?}: {size} bytes");

        let mut current = block;

        // Free neighbours were merged when they were freed themselves, so one
        // step in each direction is enough.
        if let Some(left) = self.blocks[current].left {
            if self.blocks[left].is_mergeable() && self.blocks[current].coalescable {
                self.absorb_right(left);
                current = left;
            }
        }

        if let Some(right) = self.blocks[current].right {
            if self.blocks[right].is_mergeable() && self.blocks[current].coalescable {
                self.absorb_right(current);
            }
        }

        // Nothing to the right means this is the end of the pool.
        if self.blocks[current].right.is_none() {
            self.pools[pool].tail = Some(current);
        }

        Ok(current)
    }

    /// Merges the right neighbour of `block` into it. The neighbour's
    /// descriptor is discarded and its header becomes user memory again.
    fn absorb_right(&mut self, block: BlockId) {
        let Some(right) = self.blocks[block].right else {
            panic!("{block:?} has no right neighbour to absorb");
        };
        let Some(absorbed) = self.blocks.remove(right) else {
            panic!("dangling right link {right:?} of {block:?}");
        };

        let pool = absorbed.pool;
        if let Some(next) = absorbed.right {
            self.blocks[next].left = Some(block);
        }

        let merged = &mut self.blocks[block];
        merged.right = absorbed.right;
        merged.size += BLOCK_HEADER_SIZE + absorbed.size;

        let pool = &mut self.pools[pool];
        if pool.tail == Some(right) {
            pool.tail = Some(block);
        }
        pool.occupancy -= BLOCK_HEADER_SIZE;

        log::trace!("merged {right:?} into {block:?}: {} bytes", merged.size);
    }
}
