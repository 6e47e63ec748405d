//! Sizing and alignment helpers plus the numeric constants of the allocator.
//!
//! These are the only policy numbers in the crate. Everything here is a pure
//! `const fn` so the values can be used in constant expressions as well.

use std::mem;

/// Alignment of every block and every pointer handed out by the allocator.
/// Four machine words, which is 32 bytes on 64 bit targets.
pub const ALLOCATION_ALIGNMENT: usize = mem::size_of::<u64>() * 4;

/// Smallest amount of user memory a block can hold.
pub const MINIMUM_ALLOCATION_SIZE: usize = mem::size_of::<u64>() * 4;

/// A pool never spans less than this many granularity units.
pub const MINIMUM_PAGES_PER_POOL: usize = 4;

/// Size of the pool reserved lazily by the first allocation.
pub const DEFAULT_INITIAL_POOL_SIZE: usize = kilobytes(256);

/// Requests bigger than this get a pool of their own unless configured otherwise.
pub const DEFAULT_LARGE_THRESHOLD: usize = megabytes(1);

const _: () = assert!(ALLOCATION_ALIGNMENT.is_power_of_two());
const _: () = assert!(MINIMUM_ALLOCATION_SIZE.is_multiple_of(ALLOCATION_ALIGNMENT));

#[inline]
pub const fn bytes(n: usize) -> usize {
    n
}

#[inline]
pub const fn kilobytes(n: usize) -> usize {
    1024 * bytes(n)
}

#[inline]
pub const fn megabytes(n: usize) -> usize {
    1024 * kilobytes(n)
}

#[inline]
pub const fn gigabytes(n: usize) -> usize {
    1024 * megabytes(n)
}

#[inline]
pub const fn terabytes(n: usize) -> usize {
    1024 * gigabytes(n)
}

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// Returns `None` when the rounded value does not fit in a `usize`.
#[inline]
pub const fn align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(aligment - 1) {
        Some(value) => Some(value & !(aligment - 1)),
        None => None,
    }
}

/// Clamps a request to [`MINIMUM_ALLOCATION_SIZE`].
#[inline]
pub const fn minimum_allocation_size(size: usize) -> usize {
    if size > MINIMUM_ALLOCATION_SIZE {
        size
    } else {
        MINIMUM_ALLOCATION_SIZE
    }
}

/// Size of the block that serves a request of `size` bytes: clamped to the
/// minimum and rounded up to [`ALLOCATION_ALIGNMENT`].
#[inline]
pub const fn allocation_size(size: usize) -> Option<usize> {
    align(minimum_allocation_size(size), ALLOCATION_ALIGNMENT)
}

/// Number of bytes to reserve for a pool able to hold `size` bytes.
///
/// The result is a multiple of `granularity` spanning at least
/// [`MINIMUM_PAGES_PER_POOL`] units.
#[inline]
pub const fn minimum_pool_size(size: usize, granularity: usize) -> Option<usize> {
    let mut pages = size / granularity;
    if size % granularity > 0 {
        pages += 1;
    }
    if pages < MINIMUM_PAGES_PER_POOL {
        pages = MINIMUM_PAGES_PER_POOL;
    }
    pages.checked_mul(granularity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_allocation_boundary() {
        let aligments = vec![(1..33, 32), (33..65, 64), (65..97, 96), (97..129, 128)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(Some(expected), align(size, ALLOCATION_ALIGNMENT));
            }
        }
    }

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(Some(expected), align(size, 4096));
            }
        }
    }

    #[test]
    fn align_overflow() {
        assert_eq!(None, align(usize::MAX, ALLOCATION_ALIGNMENT));
        assert_eq!(Some(0), align(0, ALLOCATION_ALIGNMENT));
    }

    #[test]
    fn allocation_size_respects_minimum() {
        assert_eq!(ALLOCATION_ALIGNMENT, 32);
        assert_eq!(Some(32), allocation_size(0));
        assert_eq!(Some(32), allocation_size(1));
        assert_eq!(Some(32), allocation_size(32));
        assert_eq!(Some(64), allocation_size(33));
        assert_eq!(Some(64), allocation_size(64));
        assert_eq!(None, allocation_size(usize::MAX - 3));
    }

    #[test]
    fn pool_size_rounds_to_granularity() {
        assert_eq!(Some(4 * 4096), minimum_pool_size(0, 4096));
        assert_eq!(Some(4 * 4096), minimum_pool_size(4096 * 4, 4096));
        assert_eq!(Some(5 * 4096), minimum_pool_size(4096 * 4 + 1, 4096));
        assert_eq!(Some(kilobytes(256)), minimum_pool_size(kilobytes(256), 4096));
        assert_eq!(Some(4 * 65536), minimum_pool_size(kilobytes(1), 65536));
        assert_eq!(None, minimum_pool_size(usize::MAX, 4096));
    }

    #[test]
    fn units() {
        assert_eq!(bytes(3), 3);
        assert_eq!(kilobytes(1), 1024);
        assert_eq!(megabytes(1), 1024 * 1024);
        assert_eq!(gigabytes(2), 2 * 1024 * 1024 * 1024);
        assert_eq!(terabytes(1), 1024 * gigabytes(1));
        assert_eq!(DEFAULT_INITIAL_POOL_SIZE, 262_144);
    }
}
