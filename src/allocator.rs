use std::ptr::NonNull;

use snafu::OptionExt as _;

use crate::{
    block::BLOCK_HEADER_SIZE,
    config::AllocatorConfig,
    error::{AllocError, CorruptionError, SizeOverflowSnafu},
    fit::FitStrategy,
    kernel::{Kernel, PlatformMemory},
    ledger::Ledger,
    pool::POOL_HEADER_SIZE,
    stats::AllocatorStats,
    utils::allocation_size,
};

/// Pool-based heap allocator.
///
/// The allocator is a plain value: every operation goes through `&mut self`
/// and independent instances share nothing. Memory handed out by an allocator
/// is returned to the provider when the allocator is dropped, so pointers
/// must not outlive it.
///
/// ```
/// use poolalloc::Allocator;
///
/// let mut allocator = Allocator::new();
///
/// let a = allocator.allocate(64);
/// let b = allocator.allocate(64);
/// assert_ne!(a, b);
///
/// allocator.free(a.as_ptr()).unwrap();
/// assert_eq!(allocator.allocate(64), a);
/// assert!(allocator.free(a.as_ptr()).is_ok());
/// assert!(allocator.free(a.as_ptr()).is_err());
/// ```
pub struct Allocator<M: PlatformMemory = Kernel> {
    memory: M,
    config: AllocatorConfig,
    ledger: Ledger,
    initialized: bool,
}

// SAFETY: the allocator exclusively owns every pool it points into.
unsafe impl<M: PlatformMemory + Send> Send for Allocator<M> {}

impl Allocator<Kernel> {
    /// Creates an allocator backed by the operating system. Nothing is
    /// reserved until the first [`Allocator::reserve`] or allocation.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_memory(Kernel, AllocatorConfig::DEFAULT)
    }

    #[must_use]
    pub const fn with_config(config: AllocatorConfig) -> Self {
        Self::with_memory(Kernel, config)
    }
}

impl Default for Allocator<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PlatformMemory> Allocator<M> {
    /// Creates an allocator reserving its pools from `memory`.
    pub const fn with_memory(memory: M, config: AllocatorConfig) -> Self {
        Self {
            memory,
            config,
            ledger: Ledger::new(),
            initialized: false,
        }
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[inline]
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Whether the first pool has been reserved.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn pool_count(&self) -> usize {
        self.ledger.pools.len()
    }

    /// Reserves the first pool with room for at least `size` bytes.
    ///
    /// Does nothing if the allocator already has pools.
    pub fn try_reserve(&mut self, size: usize) -> Result<(), AllocError> {
        if self.initialized {
            log::trace!("reserve({size}) ignored: already initialized");
            return Ok(());
        }

        let pool = self.ledger.create_pool(&self.memory, size, false)?;
        self.ledger.append_pool(pool);
        self.initialized = true;

        Ok(())
    }

    /// Like [`Allocator::try_reserve`], but failing to reserve memory is fatal.
    pub fn reserve(&mut self, size: usize) {
        if let Err(err) = self.try_reserve(size) {
            fatal(&err);
        }
    }

    /// Allocates a block of at least `size` bytes using the configured
    /// [`FitStrategy`].
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.try_allocate_with(size, self.config.strategy)
    }

    /// Allocates a block of at least `size` bytes using `strategy`.
    ///
    /// The returned pointer is aligned to [`crate::ALLOCATION_ALIGNMENT`] and
    /// owns `size` rounded up to the boundary, never less than
    /// [`crate::MINIMUM_ALLOCATION_SIZE`] bytes. A new pool is reserved when
    /// no existing one can serve the request.
    pub fn try_allocate_with(
        &mut self,
        size: usize,
        strategy: FitStrategy,
    ) -> Result<NonNull<u8>, AllocError> {
        if !self.initialized {
            self.try_reserve(self.config.initial_pool_size)?;
        }

        let needed = allocation_size(size).context(SizeOverflowSnafu { size })?;
        let is_large = self.config.is_large(needed);

        let block = match self.ledger.find_fit(needed, is_large, strategy) {
            Some(block) => block,
            None => {
                let pool_size = needed
                    .checked_add(POOL_HEADER_SIZE + BLOCK_HEADER_SIZE)
                    .context(SizeOverflowSnafu { size })?;
                let pool = self.ledger.create_pool(&self.memory, pool_size, is_large)?;
                self.ledger.append_pool(pool);
                self.ledger.pools[pool].first
            }
        };

        let ptr = self.ledger.split(block, needed);
        log::trace!("allocate({size}) -> {ptr:p} ({strategy:?})");

        Ok(ptr)
    }

    /// Like [`Allocator::try_allocate`], but failing to reserve memory is fatal.
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        self.allocate_with(size, self.config.strategy)
    }

    /// Like [`Allocator::try_allocate_with`], but failing to reserve memory is
    /// fatal.
    pub fn allocate_with(&mut self, size: usize, strategy: FitStrategy) -> NonNull<u8> {
        match self.try_allocate_with(size, strategy) {
            Ok(ptr) => ptr,
            Err(err) => fatal(&err),
        }
    }

    /// Frees a block returned by [`Allocator::allocate`]. Null is ignored.
    ///
    /// Any other pointer that does not name a live allocation of this
    /// allocator is rejected before anything is modified.
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), AllocError> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };

        match self.ledger.release(ptr) {
            Ok(_) => Ok(()),
            Err(err) => {
                log::warn!("{err}");
                Err(err)
            }
        }
    }

    /// Bytes usable through a live allocation.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        let block = self.ledger.occupied_block(ptr)?;
        Ok(self.ledger.blocks[block].size)
    }

    pub fn stats(&self) -> AllocatorStats {
        self.ledger.stats()
    }

    /// Walks every pool and checks the invariants of the block chains.
    pub fn verify(&self) -> Result<(), CorruptionError> {
        self.ledger.verify()
    }
}

impl<M: PlatformMemory> Drop for Allocator<M> {
    fn drop(&mut self) {
        self.ledger.release_all(&self.memory);
    }
}

#[cold]
fn fatal(err: &AllocError) -> ! {
    log::error!("{err}");
    panic!("poolalloc: {err}");
}
