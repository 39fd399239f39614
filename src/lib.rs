//! Kestrel: kernel resource manager for a single-core teaching OS.
//!
//! A first-fit arena supplies process stacks and kernel memory, a fixed
//! process table tracks every process, and a cooperative scheduler with
//! priority aging picks who runs next. Processes block through sleep and
//! event waits and are switched by a small architecture-specific routine.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod allocator;
pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod process;
#[cfg(target_os = "none")]
pub mod serial;
pub mod services;
#[cfg(feature = "self-test")]
pub mod tests;

pub use config::KernelConfig;
pub use error::{ErrorKind, KernelError, KernelResult};
pub use kernel::Kernel;

/// Park the CPU
pub fn hlt_loop() -> ! {
    loop {
        #[cfg(target_os = "none")]
        x86_64::instructions::hlt();
        #[cfg(not(target_os = "none"))]
        core::hint::spin_loop();
    }
}
