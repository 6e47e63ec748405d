//! Error types of the allocator.
//!
//! Reservation failures and size overflows are reported through
//! [`AllocError`] by the `try_*` operations and are fatal for the plain ones.
//! Misuse of [`crate::Allocator::free`] is always reported to the caller.

use std::{fmt, io};

use snafu::Snafu;

/// Failure of the virtual memory provider.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VmError {
    #[snafu(display("failed to reserve {size} bytes of virtual memory"))]
    Reserve {
        size: usize,
        #[snafu(source)]
        source: io::Error,
    },
    #[snafu(display("failed to release {size} bytes of virtual memory at {address:#x}"))]
    Release {
        address: usize,
        size: usize,
        #[snafu(source)]
        source: io::Error,
    },
}

/// Why a pointer was rejected by `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFreeReason {
    /// The pointer does not point at the start of a block owned by the allocator.
    NotOwned,
    /// The pointer lies inside a pool but not on an allocation boundary.
    Misaligned,
    /// The block behind the pointer is already free.
    NotOccupied,
}

impl fmt::Display for InvalidFreeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidFreeReason::NotOwned => write!(f, "pointer is not owned by this allocator"),
            InvalidFreeReason::Misaligned => write!(f, "pointer is not on an allocation boundary"),
            InvalidFreeReason::NotOccupied => write!(f, "block is not occupied"),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display(
        "failed to reserve a pool of {size} bytes (granularity {granularity} bytes)"
    ))]
    Reservation {
        size: usize,
        granularity: usize,
        #[snafu(source)]
        source: VmError,
    },
    #[snafu(display("a request of {size} bytes cannot be represented as a pool"))]
    SizeOverflow { size: usize },
    #[snafu(display("invalid free of {address:#x}: {reason}"))]
    InvalidFree {
        address: usize,
        reason: InvalidFreeReason,
    },
}

impl AllocError {
    /// Returns `true` for errors caused by the caller handing back a bad pointer.
    #[must_use]
    pub fn is_invalid_free(&self) -> bool {
        matches!(self, AllocError::InvalidFree { .. })
    }
}

/// A broken ledger invariant found by [`crate::Allocator::verify`].
///
/// `pool` is the pool's position in the pool list and `offset` is the byte
/// offset of a block's user memory from the start of the pool's region.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum CorruptionError {
    #[snafu(display("pool list links are inconsistent at pool {pool}"))]
    PoolLink { pool: usize },
    #[snafu(display("pool {pool} header does not describe the pool"))]
    PoolHeader { pool: usize },
    #[snafu(display("block chain of pool {pool} does not terminate"))]
    Cycle { pool: usize },
    #[snafu(display("block at offset {offset} in pool {pool} has inconsistent links"))]
    BlockLink { pool: usize, offset: usize },
    #[snafu(display("block header at offset {offset} in pool {pool} names another block"))]
    BlockHeader { pool: usize, offset: usize },
    #[snafu(display(
        "block in pool {pool} starts at offset {offset}, expected offset {expected}"
    ))]
    Gap {
        pool: usize,
        offset: usize,
        expected: usize,
    },
    #[snafu(display("block at offset {offset} in pool {pool} has a misaligned size {size}"))]
    Misaligned {
        pool: usize,
        offset: usize,
        size: usize,
    },
    #[snafu(display("free blocks at offset {offset} in pool {pool} were not coalesced"))]
    Uncoalesced { pool: usize, offset: usize },
    #[snafu(display("tail reference of pool {pool} is stale"))]
    Tail { pool: usize },
    #[snafu(display(
        "pool {pool} occupancy {occupancy} plus free {free} does not match region size {size}"
    ))]
    Conservation {
        pool: usize,
        occupancy: usize,
        free: usize,
        size: usize,
    },
}
