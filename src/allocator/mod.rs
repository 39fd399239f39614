// Memory allocators for Kestrel
//
// `first_fit` manages the kernel arena that supplies process stacks and
// kmalloc memory. On bare metal the `alloc` collections get their own heap.
pub mod first_fit;

pub use first_fit::{BlockInfo, FirstFitHeap, HeapStats, ALIGN, HEADER_SIZE};

#[cfg(target_os = "none")]
mod global {
    use crate::config::RUST_HEAP_SIZE;
    use linked_list_allocator::LockedHeap;

    #[global_allocator]
    static ALLOCATOR: LockedHeap = LockedHeap::empty();

    static mut RUST_HEAP: [u8; RUST_HEAP_SIZE] = [0; RUST_HEAP_SIZE];

    /// Hand the static heap region to the global allocator.
    ///
    /// # Safety
    ///
    /// Must be called once, before the first allocation.
    pub unsafe fn init_heap() {
        let heap_start = core::ptr::addr_of_mut!(RUST_HEAP) as usize;
        ALLOCATOR.lock().init(heap_start, RUST_HEAP_SIZE);
        log::debug!("rust heap at 0x{:x}, {} bytes", heap_start, RUST_HEAP_SIZE);
    }
}

#[cfg(target_os = "none")]
pub use global::init_heap;
