// Process table for Kestrel
use core::fmt;

use crate::allocator::FirstFitHeap;
use crate::arch::Architecture;
use crate::config::{MAX_PROCESSES, MIN_STACK_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::process::context::build_initial_stack;
use crate::process::pcb::{
    truncate_name, EntryPoint, Pid, ProcessControlBlock, ProcessKind, ProcessPriority,
    ProcessState, SavedContext, StackRegion,
};

/// Fixed set of PCB slots. The pid of a process is the index of its slot,
/// so pids are unique among live processes and get reused after exit.
pub struct ProcessTable {
    slots: [ProcessControlBlock; MAX_PROCESSES],
    current: Option<Pid>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| ProcessControlBlock::empty(Pid::new(i as u32))),
            current: None,
        }
    }

    /// Create a Ready process running `entry` on a fresh stack.
    ///
    /// Nothing changes when creation fails.
    pub fn create<A: Architecture>(
        &mut self,
        heap: &mut FirstFitHeap,
        name: &str,
        entry: Option<EntryPoint>,
        priority: ProcessPriority,
        stack_size: usize,
    ) -> KernelResult<Pid> {
        self.spawn::<A>(heap, name, entry, priority, stack_size, ProcessKind::User)
    }

    /// Create the process that runs when nothing else can
    pub fn create_idle<A: Architecture>(
        &mut self,
        heap: &mut FirstFitHeap,
        entry: EntryPoint,
        stack_size: usize,
    ) -> KernelResult<Pid> {
        self.spawn::<A>(
            heap,
            "idle",
            Some(entry),
            ProcessPriority::Low,
            stack_size,
            ProcessKind::Idle,
        )
    }

    fn spawn<A: Architecture>(
        &mut self,
        heap: &mut FirstFitHeap,
        name: &str,
        entry: Option<EntryPoint>,
        priority: ProcessPriority,
        stack_size: usize,
        kind: ProcessKind,
    ) -> KernelResult<Pid> {
        let entry = entry.ok_or(KernelError::InvalidEntry)?;
        let slot = self
            .slots
            .iter()
            .position(|pcb| !pcb.is_live())
            .ok_or(KernelError::TableFull)?;

        let stack_size = stack_size.max(MIN_STACK_SIZE);
        let base = heap.allocate(stack_size)?;
        let stack = StackRegion::new(base, stack_size);
        let stack_pointer = build_initial_stack::<A>(&stack, entry as usize, A::exit_trampoline());

        let pcb = &mut self.slots[slot];
        pcb.name = truncate_name(name);
        pcb.state = ProcessState::Ready;
        pcb.kind = kind;
        pcb.priority = priority;
        pcb.dynamic_priority = priority.level();
        pcb.context = SavedContext {
            stack_pointer,
            first_run: true,
        };
        pcb.stack = Some(stack);
        pcb.entry = Some(entry);

        log::info!(
            "created process '{}' pid {} ({:?}, {} byte stack)",
            pcb.name,
            pcb.pid,
            priority,
            stack_size
        );
        Ok(pcb.pid)
    }

    /// Free the slot of `pid` and release its stack.
    ///
    /// The caller decides what happens next if `pid` was running.
    pub fn terminate(&mut self, heap: &mut FirstFitHeap, pid: Pid) -> KernelResult<()> {
        let pcb = match self.slots.get_mut(pid.slot()) {
            Some(pcb) if pcb.is_live() => pcb,
            _ => {
                log::warn!("terminate: no process with pid {}", pid);
                return Err(KernelError::NotFound(pid));
            }
        };

        log::info!("terminated process '{}' pid {}", pcb.name, pid);
        if let Some(stack) = pcb.clear() {
            heap.deallocate(stack.base())?;
        }
        if self.current == Some(pid) {
            self.current = None;
        }
        Ok(())
    }

    /// Live process with this pid
    pub fn get(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        self.slots.get(pid.slot()).filter(|pcb| pcb.is_live())
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessControlBlock> {
        self.slots.get_mut(pid.slot()).filter(|pcb| pcb.is_live())
    }

    /// The running process
    pub fn current(&self) -> Option<&ProcessControlBlock> {
        self.current.and_then(|pid| self.get(pid))
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
    }

    pub(crate) fn set_current(&mut self, pid: Option<Pid>) {
        self.current = pid;
    }

    /// Every slot in table order, free ones included
    pub fn slots(&self) -> &[ProcessControlBlock] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [ProcessControlBlock] {
        &mut self.slots
    }

    /// Live processes in table order
    pub fn iter(&self) -> impl Iterator<Item = &ProcessControlBlock> {
        self.slots.iter().filter(|pcb| pcb.is_live())
    }

    pub fn count(&self, state: ProcessState) -> usize {
        self.slots.iter().filter(|pcb| pcb.state == state).count()
    }

    pub fn live(&self) -> usize {
        self.iter().count()
    }

    /// Any non-idle process that can still run, now or after waking up
    pub fn has_work(&self) -> bool {
        self.iter().any(|pcb| !pcb.is_idle())
    }

    pub fn idle_pid(&self) -> Option<Pid> {
        self.iter().find(|pcb| pcb.is_idle()).map(|pcb| pcb.pid)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{:<4} {:<16} {:<8} {:>4} {:>4} {:>5} {:>5}",
            "PID", "NAME", "STATE", "PRIO", "DYN", "SLEEP", "EVENT"
        )?;
        for pcb in self.iter() {
            write!(
                f,
                "{:<4} {:<16} {:<8} {:>4} {:>4} {:>5} ",
                pcb.pid,
                pcb.name,
                pcb.state.label(),
                pcb.priority.level(),
                pcb.dynamic_priority,
                pcb.sleep_ticks_remaining
            )?;
            match pcb.wait_event {
                Some(event) => writeln!(f, "{:>5}", event)?,
                None => writeln!(f, "{:>5}", "-")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Native;

    extern "C" fn noop() {}

    fn arena(bytes: usize) -> FirstFitHeap {
        let buffer: &'static mut [u64] = vec![0u64; bytes / 8].leak();
        unsafe { FirstFitHeap::new(buffer.as_mut_ptr() as *mut u8, bytes) }.unwrap()
    }

    fn spawn(table: &mut ProcessTable, heap: &mut FirstFitHeap, name: &str) -> KernelResult<Pid> {
        table.create::<Native>(heap, name, Some(noop), ProcessPriority::Normal, 256)
    }

    #[test]
    fn create_fills_a_ready_pcb() {
        let mut heap = arena(4096);
        let mut table = ProcessTable::new();
        let pid = table
            .create::<Native>(&mut heap, "shell", Some(noop), ProcessPriority::High, 512)
            .unwrap();

        let pcb = table.get(pid).unwrap();
        assert_eq!(pid, Pid::new(0));
        assert_eq!(pcb.name, "shell");
        assert_eq!(pcb.state, ProcessState::Ready);
        assert_eq!(pcb.dynamic_priority, ProcessPriority::High.level());
        assert!(pcb.context.first_run);
        let stack = pcb.stack.as_ref().unwrap();
        assert_eq!(stack.size(), 512);
        assert!(pcb.context.stack_pointer > stack.base() as usize);
        assert!(pcb.context.stack_pointer < stack.top());
        assert_eq!(table.live(), 1);
    }

    #[test]
    fn small_stacks_are_clamped() {
        let mut heap = arena(4096);
        let mut table = ProcessTable::new();
        let pid = table
            .create::<Native>(&mut heap, "tiny", Some(noop), ProcessPriority::Low, 16)
            .unwrap();
        assert_eq!(table.get(pid).unwrap().stack.as_ref().unwrap().size(), MIN_STACK_SIZE);
    }

    #[test]
    fn missing_entry_is_rejected() {
        let mut heap = arena(4096);
        let mut table = ProcessTable::new();
        let free = heap.stats().free;
        let result = table.create::<Native>(&mut heap, "null", None, ProcessPriority::Low, 256);
        assert_eq!(result, Err(KernelError::InvalidEntry));
        assert_eq!(heap.stats().free, free);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn table_full_after_capacity() {
        let mut heap = arena(64 * 1024);
        let mut table = ProcessTable::new();
        for i in 0..MAX_PROCESSES {
            assert_eq!(spawn(&mut table, &mut heap, "worker"), Ok(Pid::new(i as u32)));
        }
        let used = heap.stats().used;
        assert_eq!(spawn(&mut table, &mut heap, "extra"), Err(KernelError::TableFull));
        assert_eq!(heap.stats().used, used);
    }

    #[test]
    fn failed_stack_allocation_leaves_no_trace() {
        let mut heap = arena(512);
        let mut table = ProcessTable::new();
        spawn(&mut table, &mut heap, "first").unwrap();
        let before = heap.stats();

        let result = table.create::<Native>(&mut heap, "big", Some(noop), ProcessPriority::Low, 1024);
        assert_eq!(result, Err(KernelError::OutOfMemory { requested: 1024 }));
        assert_eq!(heap.stats(), before);
        assert_eq!(table.live(), 1);
        assert_eq!(table.count(ProcessState::Terminated), MAX_PROCESSES - 1);
    }

    #[test]
    fn terminate_releases_the_stack_and_reuses_the_slot() {
        let mut heap = arena(4096);
        let mut table = ProcessTable::new();
        let free = heap.stats().free;
        let a = spawn(&mut table, &mut heap, "a").unwrap();
        let _b = spawn(&mut table, &mut heap, "b").unwrap();

        table.terminate(&mut heap, a).unwrap();
        assert!(table.get(a).is_none());
        assert_eq!(table.slots()[a.slot()].state, ProcessState::Terminated);

        let c = spawn(&mut table, &mut heap, "c").unwrap();
        assert_eq!(c, a);
        assert_eq!(table.get(c).unwrap().name, "c");

        table.terminate(&mut heap, Pid::new(1)).unwrap();
        table.terminate(&mut heap, c).unwrap();
        assert_eq!(heap.stats().free, free);
    }

    #[test]
    fn terminate_unknown_pid_is_reported() {
        let mut heap = arena(4096);
        let mut table = ProcessTable::new();
        assert_eq!(table.terminate(&mut heap, Pid::new(3)), Err(KernelError::NotFound(Pid::new(3))));
        assert_eq!(table.terminate(&mut heap, Pid::new(99)), Err(KernelError::NotFound(Pid::new(99))));

        let pid = spawn(&mut table, &mut heap, "once").unwrap();
        table.terminate(&mut heap, pid).unwrap();
        assert_eq!(table.terminate(&mut heap, pid), Err(KernelError::NotFound(pid)));
        assert_eq!(heap.stats().deallocations, 1);
    }

    #[test]
    fn live_pids_are_unique() {
        let mut heap = arena(16 * 1024);
        let mut table = ProcessTable::new();
        for _ in 0..6 {
            spawn(&mut table, &mut heap, "p").unwrap();
        }
        table.terminate(&mut heap, Pid::new(2)).unwrap();
        table.terminate(&mut heap, Pid::new(4)).unwrap();
        spawn(&mut table, &mut heap, "q").unwrap();

        let mut pids: Vec<Pid> = table.iter().map(|pcb| pcb.pid).collect();
        let count = pids.len();
        pids.dedup();
        assert_eq!(pids.len(), count);
        assert_eq!(count, 5);
    }

    #[test]
    fn dump_lists_live_processes() {
        let mut heap = arena(4096);
        let mut table = ProcessTable::new();
        spawn(&mut table, &mut heap, "editor").unwrap();
        let text = format!("{}", table);
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("PID"));
        let row = lines.next().unwrap();
        assert!(row.contains("editor"));
        assert!(row.contains("READY"));
        assert!(lines.next().is_none());
    }
}
