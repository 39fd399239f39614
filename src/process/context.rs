// Context switching for Kestrel
use core::mem::size_of;

use crate::arch::Architecture;
use crate::process::pcb::StackRegion;

/// A control transfer decided under the kernel lock and carried out after
/// the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// First dispatch with nothing to save: load the stack and jump
    Bootstrap { stack_pointer: usize, entry: usize },
    /// Save the running context to `save` and resume the one at `load`
    Switch { save: *mut usize, load: usize },
}

impl Transfer {
    /// Carry out the transfer. Returns once the saved context is resumed.
    ///
    /// # Safety
    ///
    /// The addresses must come from a live process table, and no lock on the
    /// kernel may be held.
    pub unsafe fn perform<A: Architecture>(self) {
        match self {
            Transfer::Bootstrap {
                stack_pointer,
                entry,
            } => A::bootstrap(stack_pointer, entry),
            Transfer::Switch { save, load } => A::switch(save, load),
        }
    }
}

/// Write the initial frame at the top of `stack` and return the stack
/// pointer that resumes it.
pub fn build_initial_stack<A: Architecture>(stack: &StackRegion, entry: usize, exit: usize) -> usize {
    let frame = A::initial_frame(entry, exit);
    let words = frame.as_ref();
    let top = stack.top() & !(A::STACK_ALIGN - 1);
    let stack_pointer = top - words.len() * size_of::<usize>();
    debug_assert!(stack_pointer >= stack.base() as usize);

    let slot = stack_pointer as *mut usize;
    for (i, &word) in words.iter().enumerate() {
        // in bounds: the frame sits between stack_pointer and top
        unsafe { slot.add(i).write(word) };
    }
    stack_pointer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::X86_64;
    use core::ptr::NonNull;

    #[test]
    fn frame_is_written_below_aligned_top() {
        let buffer: &'static mut [u64] = vec![0u64; 64].leak();
        let base = NonNull::new(buffer.as_mut_ptr() as *mut u8).unwrap();
        // odd size so the top needs aligning down
        let stack = StackRegion::new(base, 500);

        let sp = build_initial_stack::<X86_64>(&stack, 0xAAAA, 0xBBBB);
        let top = stack.top() & !15;
        assert_eq!(sp, top - 8 * size_of::<usize>());

        let words = unsafe { core::slice::from_raw_parts(sp as *const usize, 8) };
        assert_eq!(&words[..6], &[0; 6]);
        assert_eq!(words[6], 0xAAAA);
        assert_eq!(words[7], 0xBBBB);
    }
}
