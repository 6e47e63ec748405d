use poolalloc::{Allocator, FitStrategy, kilobytes};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut allocator = Allocator::new();
    allocator.reserve(kilobytes(256));

    let a = allocator.allocate(64);
    log_alloc(a.as_ptr(), 64);

    let b = allocator.allocate(64);
    log_alloc(b.as_ptr(), 64);

    allocator.free(a.as_ptr()).unwrap();

    let c = allocator.allocate(64);
    log_alloc(c.as_ptr(), 64);
    println!("Reused freed block: {}", c == a);

    // Fast fit only looks at the end of each pool.
    let d = allocator.allocate_with(16, FitStrategy::FastFit);
    log_alloc(d.as_ptr(), 16);

    if let Err(err) = allocator.free(a.as_ptr()).and_then(|()| allocator.free(a.as_ptr())) {
        println!("Second free rejected: {err}");
    }

    allocator.free(b.as_ptr()).unwrap();
    allocator.free(d.as_ptr()).unwrap();

    for pool in allocator.stats().pools {
        println!(
            "Pool of {} bytes: {} occupied, {} free in {} blocks",
            pool.size, pool.occupancy, pool.free_bytes, pool.blocks
        );
    }
}
