//! Read-only snapshots of pool occupancy. Meant for diagnostics and tests,
//! nothing in the allocator reads them back.

use crate::{block::BLOCK_HEADER_SIZE, ledger::Ledger, pool::PoolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes reserved from the memory provider, pool header included.
    pub reserved: usize,
    /// Size of the usable region.
    pub size: usize,
    /// Occupied user bytes plus every block header.
    pub occupancy: usize,
    /// Sum of the sizes of the free blocks.
    pub free_bytes: usize,
    /// Biggest single request the pool could serve right now.
    pub largest_free_block: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    /// `false` while the right-most block of the pool is occupied.
    pub has_tail: bool,
    pub is_large: bool,
}

impl PoolStats {
    /// Bytes lost to block headers.
    #[must_use]
    pub fn header_overhead(&self) -> usize {
        self.blocks * BLOCK_HEADER_SIZE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// One entry per pool, in pool list order.
    pub pools: Vec<PoolStats>,
}

impl AllocatorStats {
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.pools.iter().map(|pool| pool.reserved).sum()
    }

    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.pools.iter().map(|pool| pool.occupancy).sum()
    }

    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.pools.iter().map(|pool| pool.free_bytes).sum()
    }
}

impl Ledger {
    pub(crate) fn pool_stats(&self, id: PoolId) -> PoolStats {
        let pool = &self.pools[id];
        let mut stats = PoolStats {
            reserved: pool.reserved,
            size: pool.size,
            occupancy: pool.occupancy,
            free_bytes: 0,
            largest_free_block: 0,
            blocks: 0,
            free_blocks: 0,
            has_tail: pool.tail.is_some(),
            is_large: pool.is_large,
        };

        for block in self.block_ids(id).map(|block| &self.blocks[block]) {
            stats.blocks += 1;
            if block.is_free() {
                stats.free_blocks += 1;
                stats.free_bytes += block.size;
                stats.largest_free_block = stats.largest_free_block.max(block.size);
            }
        }

        stats
    }

    pub(crate) fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            pools: self.pool_ids().map(|id| self.pool_stats(id)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fit::FitStrategy, kernel::mock::MockMemory};

    #[test]
    fn stats_follow_the_ledger() {
        let memory = MockMemory::new(4096);
        let mut ledger = Ledger::new();
        assert_eq!(ledger.stats(), AllocatorStats::default());

        let pool = ledger.create_pool(&memory, 0, false).unwrap();
        ledger.append_pool(pool);

        let block = ledger.find_fit(64, false, FitStrategy::BestFit).unwrap();
        ledger.split(block, 64);

        let stats = ledger.stats();
        assert_eq!(stats.pools.len(), 1);

        let pool = stats.pools[0];
        assert_eq!(pool.reserved, 4 * 4096);
        assert_eq!(pool.blocks, 2);
        assert_eq!(pool.free_blocks, 1);
        assert_eq!(pool.occupancy, 64 + 2 * BLOCK_HEADER_SIZE);
        assert_eq!(pool.header_overhead(), 2 * BLOCK_HEADER_SIZE);
        assert_eq!(pool.occupancy + pool.free_bytes, pool.size);
        assert_eq!(pool.largest_free_block, pool.free_bytes);
        assert!(pool.has_tail);
        assert!(!pool.is_large);

        assert_eq!(stats.reserved(), 4 * 4096);
        assert_eq!(stats.occupancy() + stats.free_bytes(), pool.size);

        ledger.release_all(&memory);
    }
}
