//! The internal state of the allocator: every pool and every block descriptor
//! it owns, plus the ordered list of pools.
//!
//! Descriptors live in arenas and refer to each other by handle. The pool
//! memory itself only carries small headers naming those handles, see
//! [`crate::block::BlockHeader`] and [`crate::pool::PoolHeader`].

use snafu::{OptionExt as _, ensure};

use crate::{
    arena::Arena,
    block::{BLOCK_HEADER_SIZE, BlockDescriptor, BlockHeader, BlockId},
    error::{
        BlockHeaderSnafu, BlockLinkSnafu, ConservationSnafu, CorruptionError, CycleSnafu,
        GapSnafu, MisalignedSnafu, PoolHeaderSnafu, PoolLinkSnafu, TailSnafu, UncoalescedSnafu,
    },
    kernel::PlatformMemory,
    pool::{Pool, PoolHeader, PoolId},
    utils::ALLOCATION_ALIGNMENT,
};

pub(crate) struct Ledger {
    pub pools: Arena<Pool>,
    pub blocks: Arena<BlockDescriptor>,
    /// First pool of the list.
    pub head: Option<PoolId>,
    /// Last pool of the list. New pools are appended here.
    pub tail: Option<PoolId>,
}

/// Walks the pool list from head to tail.
pub(crate) struct Pools<'a> {
    ledger: &'a Ledger,
    current: Option<PoolId>,
}

/// Walks the blocks of one pool in address order.
pub(crate) struct Blocks<'a> {
    ledger: &'a Ledger,
    current: Option<BlockId>,
}

impl Iterator for Pools<'_> {
    type Item = PoolId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.ledger.pools[id].next;
        Some(id)
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.ledger.blocks[id].right;
        Some(id)
    }
}

impl Ledger {
    pub(crate) const fn new() -> Self {
        Self {
            pools: Arena::new(),
            blocks: Arena::new(),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn pool_ids(&self) -> Pools<'_> {
        Pools {
            ledger: self,
            current: self.head,
        }
    }

    pub(crate) fn block_ids(&self, pool: PoolId) -> Blocks<'_> {
        Blocks {
            ledger: self,
            current: Some(self.pools[pool].first),
        }
    }

    /// Pool whose usable region contains `addr`.
    pub(crate) fn pool_containing(&self, addr: usize) -> Option<PoolId> {
        self.pool_ids().find(|id| self.pools[*id].contains(addr))
    }

    /// Returns every pool to the provider and forgets about them.
    pub(crate) fn release_all<M: PlatformMemory>(&mut self, memory: &M) {
        let pools: Vec<PoolId> = self.pools.iter().map(|(id, _)| id).collect();

        for id in pools {
            if let Some(pool) = self.pools.remove(id) {
                // SAFETY: the region came from `memory` and every pointer into
                // it dies with the allocator.
                match unsafe { memory.release(pool.base, pool.reserved) } {
                    Ok(()) => log::debug!("released pool {id:?}: {} bytes", pool.reserved),
                    Err(err) => log::warn!("failed to release pool {id:?}: {err}"),
                }
            }
        }

        self.blocks = Arena::new();
        self.head = None;
        self.tail = None;
    }

    /// Checks every structural invariant of the pool list and of each pool's
    /// block chain.
    pub(crate) fn verify(&self) -> Result<(), CorruptionError> {
        let mut prev = None;
        let mut current = self.head;
        let mut position = 0;

        while let Some(id) = current {
            ensure!(position < self.pools.len(), PoolLinkSnafu { pool: position });
            let pool = self.pools.get(id).context(PoolLinkSnafu { pool: position })?;
            ensure!(pool.prev == prev, PoolLinkSnafu { pool: position });

            self.verify_pool(position, id, pool)?;

            prev = current;
            current = pool.next;
            position += 1;
        }

        ensure!(self.tail == prev, PoolLinkSnafu { pool: position });
        ensure!(position == self.pools.len(), PoolLinkSnafu { pool: position });

        Ok(())
    }

    fn verify_pool(&self, position: usize, id: PoolId, pool: &Pool) -> Result<(), CorruptionError> {
        let header = unsafe { PoolHeader::read(pool.base) };
        ensure!(
            header.pool == id && header.reserved == pool.reserved,
            PoolHeaderSnafu { pool: position }
        );

        let start = pool.memory.as_ptr() as usize;
        let mut expected = BLOCK_HEADER_SIZE;
        let mut left = None;
        let mut last = pool.first;
        let mut current = Some(pool.first);
        let mut visited = 0;
        let mut free = 0;
        let mut previous_mergeable = false;

        while let Some(block_id) = current {
            ensure!(visited < self.blocks.len(), CycleSnafu { pool: position });
            visited += 1;

            let block = self.blocks.get(block_id).context(BlockLinkSnafu {
                pool: position,
                offset: expected,
            })?;
            let offset = block.offset;

            ensure!(
                block.pool == id
                    && block.left == left
                    && block.data.as_ptr() as usize == start + offset,
                BlockLinkSnafu {
                    pool: position,
                    offset
                }
            );
            ensure!(
                offset == expected,
                GapSnafu {
                    pool: position,
                    offset,
                    expected
                }
            );
            ensure!(
                block.size.is_multiple_of(ALLOCATION_ALIGNMENT),
                MisalignedSnafu {
                    pool: position,
                    offset,
                    size: block.size
                }
            );
            ensure!(
                block.end_offset() <= pool.size,
                GapSnafu {
                    pool: position,
                    offset: block.end_offset(),
                    expected: pool.size
                }
            );

            let header = unsafe { BlockHeader::read(block.data) };
            ensure!(
                header.block == block_id,
                BlockHeaderSnafu {
                    pool: position,
                    offset
                }
            );

            ensure!(
                !(previous_mergeable && block.is_mergeable()),
                UncoalescedSnafu {
                    pool: position,
                    offset
                }
            );

            if block.is_free() {
                free += block.size;
            }

            previous_mergeable = block.is_mergeable();
            expected = block.end_offset() + BLOCK_HEADER_SIZE;
            left = Some(block_id);
            last = block_id;
            current = block.right;
        }

        let end = expected - BLOCK_HEADER_SIZE;
        ensure!(
            end == pool.size,
            GapSnafu {
                pool: position,
                offset: end,
                expected: pool.size
            }
        );

        let last_is_free = self.blocks[last].is_free();
        match pool.tail {
            Some(tail) => ensure!(tail == last && last_is_free, TailSnafu { pool: position }),
            None => ensure!(!last_is_free, TailSnafu { pool: position }),
        }

        ensure!(
            pool.occupancy.checked_add(free) == Some(pool.size),
            ConservationSnafu {
                pool: position,
                occupancy: pool.occupancy,
                free,
                size: pool.size
            }
        );

        Ok(())
    }
}
