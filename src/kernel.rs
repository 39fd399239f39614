//! The kernel context object.
//!
//! [`Kernel`] owns the arena, the process table and the scheduler and runs
//! every process operation against them. Operations that may give the CPU
//! away return a [`Dispatch`]; [`Kernel::transfer`] turns it into the
//! [`Transfer`] the caller performs once it no longer holds the kernel.
//! Several kernels can exist side by side, which is how the tests use it.

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::allocator::{FirstFitHeap, HeapStats};
use crate::arch::{Architecture, Native};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::process::event;
use crate::process::{
    Dispatch, DispatchMode, EntryPoint, EventId, Pid, ProcessControlBlock, ProcessInfo,
    ProcessPriority, ProcessTable, Scheduler, SchedulerStats, Transfer,
};

pub struct Kernel {
    heap: FirstFitHeap,
    table: ProcessTable,
    scheduler: Scheduler,
    config: KernelConfig,
}

impl Kernel {
    /// Build a kernel over the arena at `base`.
    ///
    /// # Safety
    ///
    /// See [`FirstFitHeap::new`].
    pub unsafe fn new(config: KernelConfig, base: *mut u8, size: usize) -> KernelResult<Self> {
        let heap = FirstFitHeap::new(base, size)?;
        Self::with_heap(config, heap)
    }

    pub fn with_arena(config: KernelConfig, arena: &'static mut [u8]) -> KernelResult<Self> {
        let heap = FirstFitHeap::from_slice(arena)?;
        Self::with_heap(config, heap)
    }

    fn with_heap(config: KernelConfig, mut heap: FirstFitHeap) -> KernelResult<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.policy, config.dispatch_mode, config.time_quantum)?;
        let mut table = ProcessTable::new();
        if let Some(idle) = config.idle {
            table.create_idle::<Native>(&mut heap, idle, config.idle_stack_size)?;
        }

        log::info!(
            "kernel ready: {:?} scheduling, {:?} dispatch, quantum {} ticks, arena {} bytes",
            config.policy,
            config.dispatch_mode,
            config.time_quantum,
            heap.capacity()
        );
        Ok(Self {
            heap,
            table,
            scheduler,
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn heap(&self) -> &FirstFitHeap {
        &self.heap
    }

    pub fn create(
        &mut self,
        name: &str,
        entry: Option<EntryPoint>,
        priority: ProcessPriority,
        stack_size: usize,
    ) -> KernelResult<Pid> {
        self.table
            .create::<Native>(&mut self.heap, name, entry, priority, stack_size)
    }

    /// Terminate `pid`. Terminating the running process takes its exit
    /// path and hands the CPU to someone else.
    pub fn terminate(&mut self, pid: Pid) -> KernelResult<Dispatch> {
        if self.table.get(pid).map_or(false, ProcessControlBlock::is_idle) {
            return Err(KernelError::IdleProcess);
        }
        if self.table.current_pid() == Some(pid) && self.config.dispatch_mode == DispatchMode::ContextSwitch {
            return self.exit_current();
        }
        self.table.terminate(&mut self.heap, pid)?;
        Ok(Dispatch::Stay)
    }

    /// Terminate the running process and pick a successor
    pub fn exit_current(&mut self) -> KernelResult<Dispatch> {
        if self.config.dispatch_mode == DispatchMode::Batch {
            return Err(KernelError::BatchMode);
        }
        let pid = self.table.current_pid().ok_or(KernelError::NoCurrentProcess)?;
        if self.table.get(pid).map_or(false, ProcessControlBlock::is_idle) {
            return Err(KernelError::IdleProcess);
        }
        // The stack is released while still in use. Only block headers are
        // written until the switch, and none lie inside the stack.
        self.table.terminate(&mut self.heap, pid)?;
        Ok(self.scheduler.reschedule(&mut self.table, Some(pid)))
    }

    /// Leave the boot context for good
    pub fn start(&mut self) -> KernelResult<Dispatch> {
        self.require_context_switch()?;
        if self.table.current_pid().is_some() {
            return Ok(Dispatch::Stay);
        }
        Ok(self.scheduler.start(&mut self.table))
    }

    /// Run processes from the calling context and come back to it once
    /// nothing is Ready
    pub fn launch(&mut self) -> KernelResult<Dispatch> {
        self.require_context_switch()?;
        if self.table.current_pid().is_some() {
            return Ok(Dispatch::Stay);
        }
        Ok(self.scheduler.launch(&mut self.table))
    }

    pub fn yield_current(&mut self) -> KernelResult<Dispatch> {
        if self.config.dispatch_mode == DispatchMode::Batch {
            return Ok(Dispatch::Stay);
        }
        self.scheduler.yield_current(&mut self.table)
    }

    /// Charge one quantum tick to the running process
    pub fn tick(&mut self) -> KernelResult<Dispatch> {
        if self.config.dispatch_mode == DispatchMode::Batch {
            return Ok(Dispatch::Stay);
        }
        self.scheduler.tick(&mut self.table)
    }

    pub fn sleep(&mut self, ticks: u32) -> KernelResult<Dispatch> {
        if ticks == 0 {
            return Ok(Dispatch::Stay);
        }
        let pid = self.blocking_caller()?;
        event::sleep(&mut self.table, pid, ticks)?;
        Ok(self.scheduler.reschedule(&mut self.table, Some(pid)))
    }

    pub fn wait(&mut self, event: EventId) -> KernelResult<Dispatch> {
        let pid = self.blocking_caller()?;
        event::wait(&mut self.table, pid, event)?;
        Ok(self.scheduler.reschedule(&mut self.table, Some(pid)))
    }

    /// Ready every process waiting on `event`. The caller keeps running.
    pub fn wakeup(&mut self, event: EventId) -> usize {
        event::wakeup(&mut self.table, event)
    }

    /// Advance sleepers by one tick
    pub fn timer_tick(&mut self) -> usize {
        event::timer_tick(&mut self.table)
    }

    fn blocking_caller(&self) -> KernelResult<Pid> {
        if self.config.dispatch_mode == DispatchMode::Batch {
            return Err(KernelError::BatchMode);
        }
        let pcb = self.table.current().ok_or(KernelError::NoCurrentProcess)?;
        if pcb.is_idle() {
            return Err(KernelError::IdleProcess);
        }
        Ok(pcb.pid)
    }

    fn require_context_switch(&self) -> KernelResult<()> {
        match self.config.dispatch_mode {
            DispatchMode::ContextSwitch => Ok(()),
            DispatchMode::Batch => Err(KernelError::BatchMode),
        }
    }

    /// Next process to run to completion, already marked Current
    pub fn next_batch(&mut self) -> KernelResult<Option<(Pid, EntryPoint)>> {
        if self.config.dispatch_mode != DispatchMode::Batch {
            return Err(KernelError::Unsupported);
        }
        let pid = match self.scheduler.next_batch(&mut self.table) {
            Some(pid) => pid,
            None => return Ok(None),
        };
        match self.table.get(pid).and_then(|pcb| pcb.entry) {
            Some(entry) => Ok(Some((pid, entry))),
            None => unreachable!("ready pid {} has no entry point", pid),
        }
    }

    /// The batch process `pid` returned from its entry point
    pub fn finish_batch(&mut self, pid: Pid) -> KernelResult<()> {
        self.table.terminate(&mut self.heap, pid)
    }

    /// Addresses for carrying out `dispatch`.
    ///
    /// The pointers stay valid as long as the kernel is not moved.
    pub fn transfer(&mut self, dispatch: Dispatch) -> Option<Transfer> {
        match dispatch {
            Dispatch::Stay | Dispatch::Halt { .. } => None,
            Dispatch::Bootstrap { to } => {
                let pcb = self.dispatched(to);
                let entry = match pcb.entry {
                    Some(entry) => entry as usize,
                    None => unreachable!("pid {} has no entry point", to),
                };
                Some(Transfer::Bootstrap {
                    stack_pointer: Native::bootstrap_stack_pointer(pcb.context.stack_pointer),
                    entry,
                })
            }
            Dispatch::Launch { to } => {
                let load = self.dispatched(to).context.stack_pointer;
                Some(Transfer::Switch {
                    save: &mut self.scheduler.boot_context as *mut usize,
                    load,
                })
            }
            Dispatch::Switch { from, to } => {
                let load = self.dispatched(to).context.stack_pointer;
                Some(Transfer::Switch {
                    save: self.save_slot(from),
                    load,
                })
            }
            Dispatch::ReturnToBoot { from } => Some(Transfer::Switch {
                save: self.save_slot(from),
                load: self.scheduler.boot_context,
            }),
        }
    }

    fn dispatched(&self, pid: Pid) -> &ProcessControlBlock {
        match self.table.get(pid) {
            Some(pcb) => pcb,
            None => unreachable!("switch into terminated pid {}", pid),
        }
    }

    fn save_slot(&mut self, from: Option<Pid>) -> *mut usize {
        match from.and_then(|pid| self.table.get_mut(pid)) {
            Some(pcb) => &mut pcb.context.stack_pointer as *mut usize,
            None => &mut self.scheduler.scratch_context as *mut usize,
        }
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.table.iter().map(ProcessControlBlock::info).collect()
    }

    pub fn process(&self, pid: Pid) -> Option<ProcessInfo> {
        self.table.get(pid).map(ProcessControlBlock::info)
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.table.current_pid()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats(&self.table)
    }

    pub fn set_time_quantum(&mut self, ticks: u32) -> KernelResult<()> {
        self.scheduler.set_time_quantum(ticks)?;
        self.config.time_quantum = ticks;
        Ok(())
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn kmalloc(&mut self, size: usize) -> KernelResult<NonNull<u8>> {
        self.heap.allocate(size)
    }

    pub fn kfree(&mut self, ptr: *mut u8) -> KernelResult<()> {
        self.heap.deallocate(ptr)
    }
}
