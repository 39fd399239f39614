// Kernel services for Kestrel
//
// The process and memory services share one kernel instance, created by
// `process_service::init` and locked for the duration of each call.
pub mod memory_service;
pub mod process_service;

use conquer_once::spin::OnceCell;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;

static KERNEL: OnceCell<Mutex<Kernel>> = OnceCell::uninit();

fn install(kernel: Kernel) -> KernelResult<()> {
    KERNEL
        .try_init_once(move || Mutex::new(kernel))
        .map_err(|_| KernelError::AlreadyInitialized)
}

fn kernel() -> KernelResult<&'static Mutex<Kernel>> {
    KERNEL.try_get().map_err(|_| KernelError::NotInitialized)
}

/// Run `f` with the kernel locked
fn with_kernel<T>(f: impl FnOnce(&mut Kernel) -> KernelResult<T>) -> KernelResult<T> {
    let mut kernel = kernel()?.lock();
    f(&mut kernel)
}
