use crate::{
    fit::FitStrategy,
    utils::{DEFAULT_INITIAL_POOL_SIZE, DEFAULT_LARGE_THRESHOLD},
};

/// Construction-time settings of an [`crate::Allocator`].
///
/// ```
/// use poolalloc::{AllocatorConfig, FitStrategy, kilobytes};
///
/// let config = AllocatorConfig::DEFAULT
///     .with_strategy(FitStrategy::FastFit)
///     .with_initial_pool_size(kilobytes(64))
///     .with_large_threshold(None);
///
/// assert_eq!(config.strategy, FitStrategy::FastFit);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Strategy used by [`crate::Allocator::allocate`].
    pub strategy: FitStrategy,
    /// Size of the pool reserved on first use when no explicit reservation
    /// was made.
    pub initial_pool_size: usize,
    /// Requests bigger than this many bytes get a pool of their own. `None`
    /// treats every request as an ordinary one.
    pub large_threshold: Option<usize>,
}

impl AllocatorConfig {
    pub const DEFAULT: Self = Self {
        strategy: FitStrategy::BestFit,
        initial_pool_size: DEFAULT_INITIAL_POOL_SIZE,
        large_threshold: Some(DEFAULT_LARGE_THRESHOLD),
    };

    #[must_use]
    pub const fn with_strategy(mut self, strategy: FitStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_initial_pool_size(mut self, size: usize) -> Self {
        self.initial_pool_size = size;
        self
    }

    #[must_use]
    pub const fn with_large_threshold(mut self, threshold: Option<usize>) -> Self {
        self.large_threshold = threshold;
        self
    }

    /// Whether a request of `size` rounded bytes needs a large pool.
    #[inline]
    pub(crate) fn is_large(&self, size: usize) -> bool {
        self.large_threshold.is_some_and(|threshold| size > threshold)
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
