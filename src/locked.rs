use std::ptr::NonNull;

use spin::{Mutex, MutexGuard};

use crate::{
    allocator::Allocator,
    error::AllocError,
    kernel::{Kernel, PlatformMemory},
};

/// An [`Allocator`] behind a spin lock, for callers that need to share one
/// allocator between threads.
///
/// Every operation takes the lock for its whole duration. It can be built in
/// a `const` context, which makes a process-wide allocator a plain `static`:
///
/// ```
/// use poolalloc::LockedAllocator;
///
/// static HEAP: LockedAllocator = LockedAllocator::new();
///
/// let ptr = HEAP.allocate(100);
/// assert_eq!(HEAP.lock().usable_size(ptr).unwrap(), 128);
/// HEAP.free(ptr.as_ptr()).unwrap();
/// ```
pub struct LockedAllocator<M: PlatformMemory = Kernel> {
    inner: Mutex<Allocator<M>>,
}

impl LockedAllocator<Kernel> {
    #[must_use]
    pub const fn new() -> Self {
        Self::from_allocator(Allocator::new())
    }
}

impl Default for LockedAllocator<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PlatformMemory> LockedAllocator<M> {
    pub const fn from_allocator(allocator: Allocator<M>) -> Self {
        Self {
            inner: Mutex::new(allocator),
        }
    }

    /// Locks the allocator for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, Allocator<M>> {
        self.inner.lock()
    }

    pub fn reserve(&self, size: usize) {
        self.lock().reserve(size);
    }

    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        self.lock().allocate(size)
    }

    pub fn try_allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.lock().try_allocate(size)
    }

    pub fn free(&self, ptr: *mut u8) -> Result<(), AllocError> {
        self.lock().free(ptr)
    }

    pub fn into_inner(self) -> Allocator<M> {
        self.inner.into_inner()
    }
}
