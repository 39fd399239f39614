// Memory Management Service for Kestrel
use core::ptr::NonNull;

use crate::allocator::HeapStats;
use crate::error::KernelResult;

use super::with_kernel;

/// Allocate zeroed kernel memory from the process arena
pub fn kmalloc(size: usize) -> KernelResult<NonNull<u8>> {
    with_kernel(|kernel| kernel.kmalloc(size))
}

/// Release memory from [`kmalloc`]. Null is ignored.
pub fn kfree(ptr: *mut u8) -> KernelResult<()> {
    with_kernel(|kernel| kernel.kfree(ptr))
}

pub fn memory_stats() -> KernelResult<HeapStats> {
    with_kernel(|kernel| Ok(kernel.heap_stats()))
}

/// Walk the arena and verify the block list
pub fn check_heap() -> KernelResult<bool> {
    with_kernel(|kernel| Ok(kernel.heap().check()))
}
