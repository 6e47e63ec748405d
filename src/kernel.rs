use std::ptr::NonNull;

use crate::error::VmError;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
pub trait PlatformMemory {
    /// Request a memory region of `len` bytes. The memory must be committed,
    /// zeroed and aligned to at least [`PlatformMemory::granularity`].
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe a region returned by [`PlatformMemory::reserve`]
    /// that has not been released yet, and nothing may access it afterwards.
    unsafe fn release(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError>;

    /// Minimum reservation unit in bytes. This is usually the page size.
    fn granularity(&self) -> usize;
}

impl<M: PlatformMemory + ?Sized> PlatformMemory for &M {
    #[inline]
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError> {
        (**self).reserve(len)
    }

    #[inline]
    unsafe fn release(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        unsafe { (**self).release(addr, len) }
    }

    #[inline]
    fn granularity(&self) -> usize {
        (**self).granularity()
    }
}

/// Memory provider backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

/// Computer's reservation granularity. It never changes, so it's queried once.
static GRANULARITY: spin::Once<usize> = spin::Once::new();

impl PlatformMemory for Kernel {
    #[inline]
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError> {
        unsafe { Self::request_memory(len) }
    }

    #[inline]
    unsafe fn release(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
        unsafe { Self::return_memory(addr, len) }
    }

    #[inline]
    fn granularity(&self) -> usize {
        *GRANULARITY.call_once(|| unsafe { Self::query_granularity() })
    }
}

#[cfg(unix)]
mod unix {
    use super::Kernel;
    use crate::error::{ReleaseSnafu, ReserveSnafu, VmError};

    use libc::{mmap, munmap, off_t, size_t};
    use snafu::ResultExt as _;

    use std::{
        io,
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl Kernel {
        pub(super) unsafe fn request_memory(len: usize) -> Result<NonNull<u8>, VmError> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error()).context(ReserveSnafu { size: len });
            }

            // Anonymous mappings are zero filled by the kernel.
            match NonNull::new(addr.cast::<u8>()) {
                Some(addr) => Ok(addr),
                None => Err(io::Error::other("mmap returned a null mapping"))
                    .context(ReserveSnafu { size: len }),
            }
        }

        pub(super) unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
            let result = unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) };

            if result != 0 {
                return Err(io::Error::last_os_error()).context(ReleaseSnafu {
                    address: addr.as_ptr() as usize,
                    size: len,
                });
            }

            Ok(())
        }

        pub(super) unsafe fn query_granularity() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::Kernel;
    use crate::error::{ReleaseSnafu, ReserveSnafu, VmError};

    use snafu::ResultExt as _;
    use windows::Win32::System::{Memory, SystemInformation};

    impl Kernel {
        pub(super) unsafe fn request_memory(len: usize) -> Result<NonNull<u8>, VmError> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            // Committed pages are zero filled by the kernel.
            let addr = unsafe { Memory::VirtualAlloc(None, len, flags, protection) };

            match NonNull::new(addr.cast::<u8>()) {
                Some(addr) => Ok(addr),
                None => Err(io::Error::last_os_error()).context(ReserveSnafu { size: len }),
            }
        }

        pub(super) unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
            let result = unsafe {
                Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE)
            };

            if result.is_err() {
                return Err(io::Error::last_os_error()).context(ReleaseSnafu {
                    address: addr.as_ptr() as usize,
                    size: len,
                });
            }

            Ok(())
        }

        /// `VirtualAlloc` hands out regions aligned to the allocation
        /// granularity, not to the page size.
        pub(super) unsafe fn query_granularity() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwAllocationGranularity as usize
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        alloc::{self, Layout},
        io,
        ptr::NonNull,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::PlatformMemory;
    use crate::error::VmError;

    /// Test provider handing out zeroed heap memory within a byte budget.
    pub(crate) struct MockMemory {
        granularity: usize,
        budget: AtomicUsize,
        reservations: AtomicUsize,
        releases: AtomicUsize,
        live_bytes: AtomicUsize,
    }

    impl MockMemory {
        pub(crate) fn new(granularity: usize) -> Self {
            Self::with_budget(granularity, usize::MAX)
        }

        pub(crate) fn with_budget(granularity: usize, budget: usize) -> Self {
            Self {
                granularity,
                budget: AtomicUsize::new(budget),
                reservations: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                live_bytes: AtomicUsize::new(0),
            }
        }

        pub(crate) fn reservations(&self) -> usize {
            self.reservations.load(Ordering::Relaxed)
        }

        pub(crate) fn releases(&self) -> usize {
            self.releases.load(Ordering::Relaxed)
        }

        pub(crate) fn live_bytes(&self) -> usize {
            self.live_bytes.load(Ordering::Relaxed)
        }
    }

    impl PlatformMemory for MockMemory {
        fn reserve(&self, len: usize) -> Result<NonNull<u8>, VmError> {
            let out_of_memory = || VmError::Reserve {
                size: len,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            };

            self.budget
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
                    left.checked_sub(len)
                })
                .map_err(|_left| out_of_memory())?;

            let layout =
                Layout::from_size_align(len, self.granularity).map_err(|_err| out_of_memory())?;
            let addr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(out_of_memory)?;

            self.reservations.fetch_add(1, Ordering::Relaxed);
            self.live_bytes.fetch_add(len, Ordering::Relaxed);
            Ok(addr)
        }

        unsafe fn release(&self, addr: NonNull<u8>, len: usize) -> Result<(), VmError> {
            let layout = Layout::from_size_align(len, self.granularity).map_err(|_err| {
                VmError::Release {
                    address: addr.as_ptr() as usize,
                    size: len,
                    source: io::Error::from(io::ErrorKind::InvalidInput),
                }
            })?;
            unsafe { alloc::dealloc(addr.as_ptr(), layout) };

            self.releases.fetch_add(1, Ordering::Relaxed);
            self.live_bytes.fetch_sub(len, Ordering::Relaxed);
            Ok(())
        }

        fn granularity(&self) -> usize {
            self.granularity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ALLOCATION_ALIGNMENT;

    #[test]
    fn granularity_is_a_power_of_two() {
        let granularity = Kernel.granularity();

        assert!(granularity.is_power_of_two());
        assert!(granularity >= ALLOCATION_ALIGNMENT);
        assert_eq!(granularity, Kernel.granularity());
    }

    #[test]
    fn reserved_memory_is_zeroed_and_writable() {
        let len = Kernel.granularity() * 2;

        unsafe {
            let addr = Kernel.reserve(len).unwrap();
            assert_eq!(addr.as_ptr() as usize % Kernel.granularity(), 0);

            let memory = std::slice::from_raw_parts_mut(addr.as_ptr(), len);
            assert!(memory.iter().all(|byte| *byte == 0));

            memory[0] = 23;
            memory[len - 1] = 45;
            assert_eq!(memory[0], 23);
            assert_eq!(memory[len - 1], 45);

            Kernel.release(addr, len).unwrap();
        }
    }

    #[test]
    fn mock_budget_is_enforced() {
        let memory = mock::MockMemory::with_budget(4096, 8192);

        let first = memory.reserve(8192).unwrap();
        assert!(memory.reserve(4096).is_err());
        assert_eq!(memory.reservations(), 1);
        assert_eq!(memory.live_bytes(), 8192);

        unsafe { memory.release(first, 8192).unwrap() };
        assert_eq!(memory.releases(), 1);
        assert_eq!(memory.live_bytes(), 0);
    }
}
