// x86_64 context switch (System V calling convention)
use core::mem::size_of;

use super::Architecture;

/// rbx, rbp and r12-r15 are callee-saved; everything else is already
/// clobbered from the caller's point of view once the switch call returns.
pub struct X86_64;

const WORD: usize = size_of::<usize>();

/// r15 r14 r13 r12 rbx rbp, return address, exit address
const FRAME_WORDS: usize = 8;

impl Architecture for X86_64 {
    const SUPPORTED: bool = imp::SUPPORTED;
    const STACK_ALIGN: usize = 16;

    type Frame = [usize; FRAME_WORDS];

    fn initial_frame(entry: usize, exit: usize) -> Self::Frame {
        // Registers start zeroed. `ret` pops `entry`, leaving `exit` on top
        // as if `entry` had just been called from it.
        [0, 0, 0, 0, 0, 0, entry, exit]
    }

    fn bootstrap_stack_pointer(frame_sp: usize) -> usize {
        // skip the six registers and the return address
        frame_sp + (FRAME_WORDS - 1) * WORD
    }

    fn exit_trampoline() -> usize {
        imp::exit_trampoline()
    }

    unsafe fn bootstrap(stack_pointer: usize, entry: usize) -> ! {
        imp::bootstrap(stack_pointer, entry)
    }

    unsafe fn switch(save: *mut usize, load: usize) {
        imp::switch(save, load)
    }
}

#[cfg(all(target_arch = "x86_64", any(target_os = "none", target_os = "linux")))]
mod imp {
    core::arch::global_asm!(
        ".global kestrel_context_switch",
        "kestrel_context_switch:",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        "",
        ".global kestrel_context_bootstrap",
        "kestrel_context_bootstrap:",
        "mov rsp, rdi",
        "xor ebp, ebp",
        "jmp rsi",
        "",
        ".global kestrel_exit_trampoline",
        "kestrel_exit_trampoline:",
        "and rsp, -16",
        "call {exit}",
        "ud2",
        exit = sym crate::services::process_service::exit_current_process,
    );

    extern "C" {
        fn kestrel_context_switch(save: *mut usize, load: usize);
        fn kestrel_context_bootstrap(stack_pointer: usize, entry: usize) -> !;
        fn kestrel_exit_trampoline();
    }

    pub const SUPPORTED: bool = true;

    pub unsafe fn switch(save: *mut usize, load: usize) {
        kestrel_context_switch(save, load)
    }

    pub unsafe fn bootstrap(stack_pointer: usize, entry: usize) -> ! {
        kestrel_context_bootstrap(stack_pointer, entry)
    }

    pub fn exit_trampoline() -> usize {
        kestrel_exit_trampoline as usize
    }
}

#[cfg(not(all(target_arch = "x86_64", any(target_os = "none", target_os = "linux"))))]
mod imp {
    pub const SUPPORTED: bool = false;

    pub unsafe fn switch(_save: *mut usize, _load: usize) {
        unreachable!("context switching is not available on this target")
    }

    pub unsafe fn bootstrap(_stack_pointer: usize, _entry: usize) -> ! {
        unreachable!("context switching is not available on this target")
    }

    pub fn exit_trampoline() -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_frame_returns_into_entry_then_exit() {
        let frame = X86_64::initial_frame(0x1000, 0x2000);
        assert_eq!(frame.len(), FRAME_WORDS);
        assert!(frame[..6].iter().all(|&r| r == 0));
        assert_eq!(frame[6], 0x1000);
        assert_eq!(frame[7], 0x2000);
    }

    #[test]
    fn bootstrap_lands_on_the_exit_slot() {
        let top = 0x8000;
        let frame_sp = top - FRAME_WORDS * WORD;
        let sp = X86_64::bootstrap_stack_pointer(frame_sp);
        assert_eq!(sp, top - WORD);
        // same alignment a `call` leaves behind
        assert_eq!(sp % X86_64::STACK_ALIGN, WORD);
    }
}
