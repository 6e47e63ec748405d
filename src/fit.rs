//! Locating a free block for a request and carving the request out of it.
//!
//! Both strategies look at pools in insertion order and never at pools of the
//! other kind: large requests only use large pools and ordinary requests only
//! use ordinary pools. When nothing fits, the caller creates a new pool.

use std::ptr::NonNull;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockDescriptor, BlockHeader, BlockId, BlockState},
    ledger::Ledger,
    pool::PoolId,
    utils::MINIMUM_ALLOCATION_SIZE,
};

/// How the allocator looks for a free block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FitStrategy {
    /// Only look at the tail of every pool. Pools whose tail is occupied are
    /// skipped entirely. Cheap, but never reuses holes left in the middle of a
    /// pool.
    FastFit,
    /// Search every pool with enough free space for the smallest free block
    /// that fits, then the pools without a tail. Slower, but keeps
    /// fragmentation down.
    #[default]
    BestFit,
}

impl Ledger {
    /// Returns a free block with room for `size` bytes, or `None` if a new
    /// pool is needed.
    pub(crate) fn find_fit(
        &self,
        size: usize,
        is_large: bool,
        strategy: FitStrategy,
    ) -> Option<BlockId> {
        // A large pool holds a single block, so its tail is all there is.
        if is_large {
            return self.fast_fit(size, true);
        }

        match strategy {
            FitStrategy::FastFit => self.fast_fit(size, false),
            FitStrategy::BestFit => self.best_fit(size),
        }
    }

    fn fast_fit(&self, size: usize, is_large: bool) -> Option<BlockId> {
        self.pool_ids()
            .map(|id| &self.pools[id])
            .filter(|pool| pool.is_large == is_large)
            .filter_map(|pool| pool.tail)
            .find(|tail| self.blocks[*tail].size >= size)
    }

    fn best_fit(&self, size: usize) -> Option<BlockId> {
        let candidates = move |with_tail: bool| {
            self.pool_ids().filter(move |id| {
                let pool = &self.pools[*id];
                !pool.is_large && pool.tail.is_some() == with_tail && pool.free_bytes() >= size
            })
        };

        // Pools that lost their tail may be fragmented, so they go last.
        candidates(true)
            .chain(candidates(false))
            .find_map(|id| self.best_in_pool(id, size))
    }

    /// Smallest free block of `pool` with room for `size` bytes. Ties go to
    /// the lowest address.
    fn best_in_pool(&self, pool: PoolId, size: usize) -> Option<BlockId> {
        self.block_ids(pool)
            .filter(|id| {
                let block = &self.blocks[*id];
                block.is_mergeable() && block.size >= size
            })
            .min_by_key(|id| self.blocks[*id].size)
    }

    /// Marks `block` as occupied by a request of `size` bytes and returns the
    /// user pointer.
    ///
    /// When the block is big enough to leave a usable remainder behind, the
    /// remainder becomes a new free block to its right. Otherwise the whole
    /// block is handed out. Blocks of large pools are never split.
    pub(crate) fn split(&mut self, block: BlockId, size: usize) -> NonNull<u8> {
        let BlockDescriptor {
            state,
            coalescable,
            right,
            pool,
            data,
            offset,
            size: available,
            ..
        } = self.blocks[block];

        assert!(
            state == BlockState::Free && available >= size,
            "block {block:?} cannot hold {size} bytes"
        );

        let remainder = available - size;

        if coalescable && remainder >= BLOCK_HEADER_SIZE + MINIMUM_ALLOCATION_SIZE {
            let rest_data = unsafe { data.add(size + BLOCK_HEADER_SIZE) };
            let rest = self.blocks.insert(BlockDescriptor {
                state: BlockState::Free,
                coalescable,
                left: Some(block),
                right,
                pool,
                data: rest_data,
                offset: offset + size + BLOCK_HEADER_SIZE,
                size: remainder - BLOCK_HEADER_SIZE,
            });
            unsafe { BlockHeader::write(rest_data, rest) };

            if let Some(right) = right {
                self.blocks[right].left = Some(rest);
            }

            let carved = &mut self.blocks[block];
            carved.right = Some(rest);
            carved.size = size;
            carved.state = BlockState::Occupied;

            let pool = &mut self.pools[pool];
            if pool.tail == Some(block) {
                pool.tail = Some(rest);
            }
            pool.occupancy += size + BLOCK_HEADER_SIZE;

            log::trace!(
                "split {block:?}: {size} bytes occupied, {rest:?} keeps {} bytes",
                remainder - BLOCK_HEADER_SIZE
            );
        } else {
            self.blocks[block].state = BlockState::Occupied;

            let pool = &mut self.pools[pool];
            if pool.tail == Some(block) {
                pool.tail = None;
            }
            pool.occupancy += available;

            log::trace!("handed out {block:?} whole: {available} bytes for a {size} byte request");
        }

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernel::mock::MockMemory, utils::ALLOCATION_ALIGNMENT};

    struct Fixture {
        memory: MockMemory,
        ledger: Ledger,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                memory: MockMemory::new(4096),
                ledger: Ledger::new(),
            }
        }

        fn add_pool(&mut self, is_large: bool) -> PoolId {
            let pool = self.ledger.create_pool(&self.memory, 0, is_large).unwrap();
            self.ledger.append_pool(pool);
            pool
        }

        fn carve(&mut self, size: usize, strategy: FitStrategy) -> NonNull<u8> {
            let block = self.ledger.find_fit(size, false, strategy).unwrap();
            self.ledger.split(block, size)
        }

        fn block_at(&self, data: NonNull<u8>) -> BlockId {
            unsafe { BlockHeader::read(data).block }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.ledger.release_all(&self.memory);
        }
    }

    #[test]
    fn split_carves_the_front_of_the_tail() {
        let mut fx = Fixture::new();
        let pool = fx.add_pool(false);
        let before = fx.ledger.blocks[fx.ledger.pools[pool].first].size;

        let ptr = fx.carve(64, FitStrategy::FastFit);
        let block = fx.block_at(ptr);
        let tail = fx.ledger.pools[pool].tail.unwrap();

        assert_eq!(ptr.as_ptr() as usize % ALLOCATION_ALIGNMENT, 0);
        assert_eq!(block, fx.ledger.pools[pool].first);
        assert_eq!(fx.ledger.blocks[block].size, 64);
        assert_eq!(fx.ledger.blocks[block].right, Some(tail));
        assert_eq!(fx.ledger.blocks[tail].left, Some(block));
        assert_eq!(fx.ledger.blocks[tail].size, before - 64 - BLOCK_HEADER_SIZE);
        assert_eq!(fx.ledger.pools[pool].occupancy, 2 * BLOCK_HEADER_SIZE + 64);
        assert!(fx.ledger.verify().is_ok());
    }

    #[test]
    fn small_remainder_is_not_split() {
        let mut fx = Fixture::new();
        let pool = fx.add_pool(false);
        let whole = fx.ledger.blocks[fx.ledger.pools[pool].first].size;

        // Leaves exactly one header worth of space, which cannot hold a block.
        let ptr = fx.carve(whole - BLOCK_HEADER_SIZE, FitStrategy::FastFit);
        let block = fx.block_at(ptr);

        assert_eq!(fx.ledger.blocks[block].size, whole);
        assert_eq!(fx.ledger.blocks[block].right, None);
        assert_eq!(fx.ledger.pools[pool].tail, None);
        assert_eq!(fx.ledger.pools[pool].free_bytes(), 0);
        assert!(fx.ledger.verify().is_ok());
    }

    #[test]
    fn fast_fit_skips_pools_without_tail() {
        let mut fx = Fixture::new();
        let first = fx.add_pool(false);
        let whole = fx.ledger.blocks[fx.ledger.pools[first].first].size;
        fx.carve(whole, FitStrategy::FastFit);

        assert_eq!(fx.ledger.find_fit(32, false, FitStrategy::FastFit), None);

        let second = fx.add_pool(false);
        let found = fx.ledger.find_fit(32, false, FitStrategy::FastFit).unwrap();
        assert_eq!(fx.ledger.blocks[found].pool, second);
    }

    #[test]
    fn fast_fit_ignores_holes() {
        let mut fx = Fixture::new();
        let pool = fx.add_pool(false);

        let a = fx.carve(64, FitStrategy::FastFit);
        fx.carve(64, FitStrategy::FastFit);

        // Punch a hole by hand: the engine that does this properly lives in
        // the coalescing module.
        let hole = fx.block_at(a);
        fx.ledger.blocks[hole].state = BlockState::Free;
        fx.ledger.pools[pool].occupancy -= 64;

        let fast = fx.ledger.find_fit(64, false, FitStrategy::FastFit).unwrap();
        assert_eq!(Some(fast), fx.ledger.pools[pool].tail);

        let best = fx.ledger.find_fit(64, false, FitStrategy::BestFit).unwrap();
        assert_eq!(best, hole);
    }

    #[test]
    fn best_fit_prefers_the_smallest_hole() {
        let mut fx = Fixture::new();
        let pool = fx.add_pool(false);

        let big = fx.carve(256, FitStrategy::BestFit);
        fx.carve(32, FitStrategy::BestFit);
        let small = fx.carve(96, FitStrategy::BestFit);
        fx.carve(32, FitStrategy::BestFit);

        for ptr in [big, small] {
            let block = fx.block_at(ptr);
            let size = fx.ledger.blocks[block].size;
            fx.ledger.blocks[block].state = BlockState::Free;
            fx.ledger.pools[pool].occupancy -= size;
        }
        assert!(fx.ledger.verify().is_ok());

        assert_eq!(fx.ledger.find_fit(64, false, FitStrategy::BestFit), Some(fx.block_at(small)));
        assert_eq!(fx.ledger.find_fit(128, false, FitStrategy::BestFit), Some(fx.block_at(big)));
        assert_eq!(fx.ledger.find_fit(96, false, FitStrategy::BestFit), Some(fx.block_at(small)));
    }

    #[test]
    fn best_fit_falls_back_to_pools_without_tail() {
        let mut fx = Fixture::new();
        let pool = fx.add_pool(false);

        let hole = fx.carve(64, FitStrategy::BestFit);
        let whole = fx.ledger.blocks[fx.ledger.pools[pool].tail.unwrap()].size;
        fx.carve(whole, FitStrategy::BestFit);
        assert_eq!(fx.ledger.pools[pool].tail, None);

        let block = fx.block_at(hole);
        fx.ledger.blocks[block].state = BlockState::Free;
        fx.ledger.pools[pool].occupancy -= 64;

        assert_eq!(fx.ledger.find_fit(64, false, FitStrategy::BestFit), Some(block));
        assert_eq!(fx.ledger.find_fit(64, false, FitStrategy::FastFit), None);
        assert_eq!(fx.ledger.find_fit(96, false, FitStrategy::BestFit), None);
    }

    #[test]
    fn large_pools_are_kept_apart() {
        let mut fx = Fixture::new();
        let large = fx.add_pool(true);

        assert_eq!(fx.ledger.find_fit(32, false, FitStrategy::FastFit), None);
        assert_eq!(fx.ledger.find_fit(32, false, FitStrategy::BestFit), None);

        let block = fx.ledger.find_fit(4096, true, FitStrategy::BestFit).unwrap();
        assert_eq!(fx.ledger.blocks[block].pool, large);

        let whole = fx.ledger.blocks[block].size;
        fx.ledger.split(block, 4096);

        // The large block is handed out whole.
        assert_eq!(fx.ledger.blocks[block].size, whole);
        assert_eq!(fx.ledger.pools[large].tail, None);
        assert_eq!(fx.ledger.find_fit(32, true, FitStrategy::FastFit), None);

        fx.add_pool(false);
        assert!(fx.ledger.find_fit(32, false, FitStrategy::FastFit).is_some());
        assert!(fx.ledger.verify().is_ok());
    }

    #[test]
    #[should_panic(expected = "cannot hold")]
    fn splitting_an_occupied_block_is_fatal() {
        let mut fx = Fixture::new();
        fx.add_pool(false);

        let ptr = fx.carve(64, FitStrategy::FastFit);
        let block = fx.block_at(ptr);
        fx.ledger.split(block, 32);
    }
}
