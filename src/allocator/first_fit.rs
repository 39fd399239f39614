//! First-fit allocator over a fixed byte arena.
//!
//! The arena is covered by an address-ordered, singly linked list of blocks.
//! Each block starts with a 12 byte [`BlockHeader`] followed by its payload.
//! Links are stored as byte offsets from the arena base so the header stays
//! the same size on every target.
//!
//! Allocation takes the first free block that is large enough and splits off
//! the tail when the leftover can hold another header plus a little payload.
//! Deallocation marks the block free and merges free neighbours, so no two
//! adjacent blocks are ever both free.

use core::fmt;
use core::mem::size_of;
use core::ptr::{self, NonNull};

use static_assertions::const_assert_eq;

use crate::error::{KernelError, KernelResult};

/// Payload sizes and header positions are multiples of this
pub const ALIGN: usize = 4;

/// Bytes taken by the header in front of every block
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Minimum payload a split-off remainder must be able to hold
const SPLIT_SLACK: usize = 4;

/// End-of-list marker for `BlockHeader::next`
const NONE: u32 = u32::MAX;

/// Largest usable arena, so that every offset fits below `NONE`
const MAX_ARENA: usize = (u32::MAX as usize) & !(ALIGN - 1);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    /// Payload bytes
    size: u32,
    /// Non-zero when the block is free
    free: u32,
    /// Offset of the next header, `NONE` for the last block
    next: u32,
}

const_assert_eq!(size_of::<BlockHeader>(), 12);

/// Snapshot of arena usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
    pub overhead: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub largest_free: usize,
    pub allocations: usize,
    pub deallocations: usize,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "total {} used {} free {} overhead {} blocks {} ({} free, largest {}) allocs {} frees {}",
            self.total,
            self.used,
            self.free,
            self.overhead,
            self.blocks,
            self.free_blocks,
            self.largest_free,
            self.allocations,
            self.deallocations
        )
    }
}

/// One block as seen by [`FirstFitHeap::blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header from the arena base
    pub offset: usize,
    /// Payload bytes
    pub size: usize,
    pub free: bool,
}

impl BlockInfo {
    /// Offset of the first payload byte
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }
}

pub struct FirstFitHeap {
    base: NonNull<u8>,
    size: usize,
    allocations: usize,
    deallocations: usize,
}

// The heap has exclusive ownership of its arena.
unsafe impl Send for FirstFitHeap {}

impl FirstFitHeap {
    /// Take over `size` bytes starting at `base`.
    ///
    /// The base is aligned up to [`ALIGN`] and the length rounded down to a
    /// multiple of it. The whole arena starts out as a single free block.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes for the lifetime of the
    /// heap and must not be used by anything else.
    pub unsafe fn new(base: *mut u8, size: usize) -> KernelResult<Self> {
        let offset = base.align_offset(ALIGN);
        if base.is_null() || offset > size {
            return Err(KernelError::ArenaTooSmall { size });
        }
        let usable = ((size - offset) & !(ALIGN - 1)).min(MAX_ARENA);
        if usable < HEADER_SIZE + ALIGN {
            return Err(KernelError::ArenaTooSmall { size });
        }

        let base = NonNull::new_unchecked(base.add(offset));
        let mut heap = Self {
            base,
            size: usable,
            allocations: 0,
            deallocations: 0,
        };
        heap.write_header(
            0,
            BlockHeader {
                size: (usable - HEADER_SIZE) as u32,
                free: 1,
                next: NONE,
            },
        );
        log::debug!("first-fit arena at {:p}, {} bytes", base.as_ptr(), usable);
        Ok(heap)
    }

    /// Build a heap over a buffer that lives for the rest of the program
    pub fn from_slice(arena: &'static mut [u8]) -> KernelResult<Self> {
        unsafe { Self::new(arena.as_mut_ptr(), arena.len()) }
    }

    /// Usable arena bytes, headers included
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Start of the usable arena
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Allocate `size` zeroed bytes, rounded up to [`ALIGN`]
    pub fn allocate(&mut self, size: usize) -> KernelResult<NonNull<u8>> {
        if size == 0 {
            return Err(KernelError::ZeroSizeAllocation);
        }
        let rounded = match size.checked_add(ALIGN - 1) {
            Some(s) if s & !(ALIGN - 1) <= self.size => s & !(ALIGN - 1),
            _ => return Err(KernelError::OutOfMemory { requested: size }),
        };

        let mut offset = 0;
        while offset != NONE {
            let mut block = self.read_header(offset);
            if block.free != 0 && block.size as usize >= rounded {
                let remainder = block.size as usize - rounded;
                if remainder > HEADER_SIZE + SPLIT_SLACK {
                    let split = offset + (HEADER_SIZE + rounded) as u32;
                    self.write_header(
                        split,
                        BlockHeader {
                            size: (remainder - HEADER_SIZE) as u32,
                            free: 1,
                            next: block.next,
                        },
                    );
                    block.size = rounded as u32;
                    block.next = split;
                }
                block.free = 0;
                self.write_header(offset, block);

                let payload = self.payload(offset);
                unsafe { ptr::write_bytes(payload.as_ptr(), 0, block.size as usize) };
                self.allocations += 1;
                log::trace!("kmalloc({}) -> {:p}", size, payload.as_ptr());
                return Ok(payload);
            }
            offset = block.next;
        }

        log::warn!("kmalloc({}) failed: no free block large enough", size);
        Err(KernelError::OutOfMemory { requested: size })
    }

    /// Release a payload pointer returned by [`allocate`](Self::allocate).
    ///
    /// A null pointer is ignored. Pointers that are not a block payload and
    /// blocks that are already free are reported and left alone.
    pub fn deallocate(&mut self, ptr: *mut u8) -> KernelResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let address = ptr as usize;

        let offset = match self.find(address) {
            Some(offset) => offset,
            None => {
                log::warn!("kfree: 0x{:x} is not an allocated block", address);
                return Err(KernelError::InvalidPointer { address });
            }
        };
        let mut block = self.read_header(offset);
        if block.free != 0 {
            log::warn!("kfree: double free of 0x{:x}", address);
            return Err(KernelError::DoubleFree { address });
        }

        block.free = 1;
        self.write_header(offset, block);
        self.deallocations += 1;
        self.coalesce();
        log::trace!("kfree({:p})", ptr);
        Ok(())
    }

    /// Does `ptr` point into the arena
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr() as usize;
        let address = ptr as usize;
        address >= start && address < start + self.size
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            total: self.size,
            allocations: self.allocations,
            deallocations: self.deallocations,
            ..HeapStats::default()
        };
        for block in self.blocks() {
            stats.blocks += 1;
            stats.overhead += HEADER_SIZE;
            if block.free {
                stats.free += block.size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(block.size);
            } else {
                stats.used += block.size;
            }
        }
        stats
    }

    /// Walk the block list in address order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            offset: 0,
        }
    }

    /// Verify the block list covers the arena exactly, in address order,
    /// with no two neighbouring free blocks.
    pub fn check(&self) -> bool {
        let mut expected = 0usize;
        let mut previous_free = false;
        let mut offset = 0u32;
        loop {
            if offset as usize != expected || expected + HEADER_SIZE > self.size {
                return false;
            }
            let block = self.read_header(offset);
            let free = block.free != 0;
            if free && previous_free {
                return false;
            }
            if block.size as usize % ALIGN != 0 {
                return false;
            }
            expected += HEADER_SIZE + block.size as usize;
            previous_free = free;
            if block.next == NONE {
                return expected == self.size;
            }
            offset = block.next;
        }
    }

    fn find(&self, address: usize) -> Option<u32> {
        let start = self.base.as_ptr() as usize;
        let mut offset = 0;
        while offset != NONE {
            if start + offset as usize + HEADER_SIZE == address {
                return Some(offset);
            }
            offset = self.read_header(offset).next;
        }
        None
    }

    fn coalesce(&mut self) {
        let mut offset = 0;
        while offset != NONE {
            let mut block = self.read_header(offset);
            if block.next == NONE {
                break;
            }
            let next = self.read_header(block.next);
            if block.free != 0 && next.free != 0 {
                block.size += (HEADER_SIZE as u32) + next.size;
                block.next = next.next;
                self.write_header(offset, block);
                // stay on this block, the new neighbour may be free too
                continue;
            }
            offset = block.next;
        }
    }

    fn payload(&self, offset: u32) -> NonNull<u8> {
        unsafe {
            NonNull::new_unchecked(self.base.as_ptr().add(offset as usize + HEADER_SIZE))
        }
    }

    fn read_header(&self, offset: u32) -> BlockHeader {
        debug_assert!(offset as usize + HEADER_SIZE <= self.size);
        unsafe { ptr::read(self.base.as_ptr().add(offset as usize) as *const BlockHeader) }
    }

    fn write_header(&mut self, offset: u32, header: BlockHeader) {
        debug_assert!(offset as usize + HEADER_SIZE <= self.size);
        unsafe { ptr::write(self.base.as_ptr().add(offset as usize) as *mut BlockHeader, header) }
    }
}

/// Iterator over the blocks of a [`FirstFitHeap`]
pub struct Blocks<'a> {
    heap: &'a FirstFitHeap,
    offset: u32,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.offset == NONE {
            return None;
        }
        let header = self.heap.read_header(self.offset);
        let info = BlockInfo {
            offset: self.offset as usize,
            size: header.size as usize,
            free: header.free != 0,
        };
        self.offset = header.next;
        Some(info)
    }
}
