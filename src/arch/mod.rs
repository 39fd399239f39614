//! Architecture-specific context switching.
//!
//! Everything that depends on the register set and calling convention sits
//! behind [`Architecture`]: the layout of a new process's initial stack
//! frame, the bootstrap jump into a process that has never run, and the
//! symmetric switch between two suspended stacks.

mod amd64;

pub use amd64::X86_64;

/// Architecture the kernel is built for
pub type Native = X86_64;

pub trait Architecture {
    /// Whether the switch routines exist on this target
    const SUPPORTED: bool;

    /// Required alignment of the top of a process stack
    const STACK_ALIGN: usize;

    /// Initial frame, lowest address first
    type Frame: AsRef<[usize]>;

    /// Build the frame a process starts from.
    ///
    /// Popping it with [`switch`](Self::switch) enters `entry`, and `entry`
    /// returning falls into `exit`.
    fn initial_frame(entry: usize, exit: usize) -> Self::Frame;

    /// Stack pointer [`bootstrap`](Self::bootstrap) loads for a process
    /// whose initial frame starts at `frame_sp`
    fn bootstrap_stack_pointer(frame_sp: usize) -> usize;

    /// Address a returning entry point lands on
    fn exit_trampoline() -> usize;

    /// Start a process that has never run. No context is saved.
    ///
    /// # Safety
    ///
    /// `stack_pointer` must come from `bootstrap_stack_pointer` on a live
    /// stack and `entry` must be the matching entry point.
    unsafe fn bootstrap(stack_pointer: usize, entry: usize) -> !;

    /// Save the callee-saved registers on the current stack, store the
    /// stack pointer to `save`, then resume the context at `load`.
    ///
    /// # Safety
    ///
    /// `save` must be valid for writes and `load` must be a stack pointer
    /// produced by an earlier switch or by an initial frame.
    unsafe fn switch(save: *mut usize, load: usize);
}
