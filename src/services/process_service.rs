// Process Management Service for Kestrel
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::arch::{Architecture, Native};
use crate::config::{KernelConfig, DEFAULT_STACK_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::{
    Dispatch, DispatchMode, EntryPoint, EventId, Pid, ProcessInfo, ProcessPriority, SchedulerStats,
};

use super::{install, kernel, with_kernel};

/// Initialize the process service over `arena`
pub fn init(config: KernelConfig, arena: &'static mut [u8]) -> KernelResult<()> {
    check_init(&config)?;
    install(Kernel::with_arena(config, arena)?)
}

/// Initialize the process service over a raw memory region
///
/// # Safety
///
/// See [`Kernel::new`].
pub unsafe fn init_at(config: KernelConfig, base: *mut u8, size: usize) -> KernelResult<()> {
    check_init(&config)?;
    install(Kernel::new(config, base, size)?)
}

fn check_init(config: &KernelConfig) -> KernelResult<()> {
    if kernel().is_ok() {
        return Err(KernelError::AlreadyInitialized);
    }
    if config.dispatch_mode == DispatchMode::ContextSwitch && !Native::SUPPORTED {
        return Err(KernelError::Unsupported);
    }
    Ok(())
}

/// Decide under the lock, then switch with the lock released
fn dispatch(op: impl FnOnce(&mut Kernel) -> KernelResult<Dispatch>) -> KernelResult<()> {
    let (decision, transfer) = with_kernel(|kernel| {
        let decision = op(kernel)?;
        Ok((decision, kernel.transfer(decision)))
    })?;

    if let Dispatch::Halt { from } = decision {
        log::error!("no process can run (last pid {:?}), halting", from);
        crate::hlt_loop();
    }
    if let Some(transfer) = transfer {
        unsafe { transfer.perform::<Native>() };
    }
    Ok(())
}

/// Create a process with the default stack size
pub fn create_process(name: &str, entry: EntryPoint, priority: ProcessPriority) -> KernelResult<Pid> {
    create_process_with_stack(name, entry, priority, DEFAULT_STACK_SIZE)
}

pub fn create_process_with_stack(
    name: &str,
    entry: EntryPoint,
    priority: ProcessPriority,
    stack_size: usize,
) -> KernelResult<Pid> {
    with_kernel(|kernel| kernel.create(name, Some(entry), priority, stack_size))
}

/// Terminate a process. Terminating the caller itself does not return.
pub fn terminate_process(pid: Pid) -> KernelResult<()> {
    dispatch(|kernel| kernel.terminate(pid))
}

/// End the calling process. A returning entry point ends up here too.
pub extern "C" fn exit_current_process() -> ! {
    if let Err(e) = dispatch(|kernel| kernel.exit_current()) {
        log::error!("exit failed: {}", e);
    }
    crate::hlt_loop()
}

/// Give up the CPU to the next Ready process
pub fn yield_now() {
    if let Err(e) = dispatch(|kernel| kernel.yield_current()) {
        log::warn!("yield: {}", e);
    }
}

/// Block the caller for `ticks` timer ticks
pub fn sleep(ticks: u32) -> KernelResult<()> {
    dispatch(|kernel| kernel.sleep(ticks))
}

/// Block the caller until `event` is signalled
pub fn wait(event: EventId) -> KernelResult<()> {
    dispatch(|kernel| kernel.wait(event))
}

/// Wake every process waiting on `event`
pub fn wakeup(event: EventId) -> KernelResult<usize> {
    with_kernel(|kernel| Ok(kernel.wakeup(event)))
}

/// Charge a quantum tick to the caller, yielding when it runs out
pub fn tick() -> KernelResult<()> {
    dispatch(|kernel| kernel.tick())
}

/// Advance sleeping processes by one tick
pub fn timer_tick() -> KernelResult<usize> {
    with_kernel(|kernel| Ok(kernel.timer_tick()))
}

/// Hand the CPU to the processes for good
pub fn start() -> ! {
    match dispatch(|kernel| kernel.start()) {
        Ok(()) => log::error!("start: already running"),
        Err(e) => log::error!("start failed: {}", e),
    }
    crate::hlt_loop()
}

/// Run processes and return once none is Ready
pub fn run() -> KernelResult<()> {
    dispatch(|kernel| kernel.launch())
}

/// Run every Ready process to completion in table order.
/// Returns how many processes ran.
pub fn run_batch() -> KernelResult<usize> {
    let mut finished = 0;
    while let Some((pid, entry)) = with_kernel(|kernel| kernel.next_batch())? {
        entry();
        match with_kernel(|kernel| kernel.finish_batch(pid)) {
            // the process terminated itself
            Ok(()) | Err(KernelError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        finished += 1;
    }
    Ok(finished)
}

pub fn list_processes() -> KernelResult<Vec<ProcessInfo>> {
    with_kernel(|kernel| Ok(kernel.processes()))
}

/// Process table rendered for the shell
pub fn dump_table() -> KernelResult<String> {
    with_kernel(|kernel| Ok(kernel.table().to_string()))
}

pub fn scheduler_stats() -> KernelResult<SchedulerStats> {
    with_kernel(|kernel| Ok(kernel.scheduler_stats()))
}

pub fn set_time_quantum(ticks: u32) -> KernelResult<()> {
    with_kernel(|kernel| kernel.set_time_quantum(ticks))
}

pub fn current_pid() -> Option<Pid> {
    with_kernel(|kernel| Ok(kernel.current_pid())).ok().flatten()
}
