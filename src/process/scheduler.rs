// Process Scheduler for Kestrel
use crate::error::{KernelError, KernelResult};
use crate::process::pcb::{Pid, ProcessControlBlock, ProcessState};
use crate::process::table::ProcessTable;

/// How the next process is chosen among the Ready ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Queue order, priority ignored
    RoundRobin,
    /// Highest static priority, queue order on ties
    StrictPriority,
    /// Highest dynamic priority, table order on ties. Waiting processes age.
    PriorityAging,
}

/// How a chosen process gets the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Real stack switch between processes
    ContextSwitch,
    /// Call each entry point to completion, one after another
    Batch,
}

/// What the caller must do after a scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Keep running the current process
    Stay,
    /// First dispatch from boot, no context to save
    Bootstrap { to: Pid },
    /// First dispatch from a caller that wants control back later
    Launch { to: Pid },
    /// Suspend `from` (if it still exists) and resume `to`
    Switch { from: Option<Pid>, to: Pid },
    /// Nothing is Ready, go back to the launching context
    ReturnToBoot { from: Option<Pid> },
    /// Nothing is Ready and there is nowhere to return to
    Halt { from: Option<Pid> },
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub policy: SchedulingPolicy,
    pub mode: DispatchMode,
    pub time_quantum: u32,
    pub current: Option<Pid>,
    pub quantum_remaining: u32,
    pub dispatches: u64,
    pub context_switches: u64,
    pub idle_dispatches: u64,
    pub ticks: u64,
    pub ready: usize,
    pub sleeping: usize,
    pub waiting: usize,
}

pub struct Scheduler {
    policy: SchedulingPolicy,
    mode: DispatchMode,
    time_quantum: u32,
    /// Slot of the last dispatched process, where queue order resumes
    cursor: Option<usize>,
    /// A launching context is parked in `boot_context`
    boot_saved: bool,
    pub(crate) boot_context: usize,
    /// Save slot for contexts nobody will resume
    pub(crate) scratch_context: usize,
    dispatches: u64,
    context_switches: u64,
    idle_dispatches: u64,
    ticks: u64,
}

impl Scheduler {
    pub fn new(policy: SchedulingPolicy, mode: DispatchMode, time_quantum: u32) -> KernelResult<Self> {
        if time_quantum == 0 {
            return Err(KernelError::InvalidTimeQuantum);
        }
        Ok(Self {
            policy,
            mode,
            time_quantum,
            cursor: None,
            boot_saved: false,
            boot_context: 0,
            scratch_context: 0,
            dispatches: 0,
            context_switches: 0,
            idle_dispatches: 0,
            ticks: 0,
        })
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn time_quantum(&self) -> u32 {
        self.time_quantum
    }

    /// Takes effect from the next dispatch
    pub fn set_time_quantum(&mut self, ticks: u32) -> KernelResult<()> {
        if ticks == 0 {
            return Err(KernelError::InvalidTimeQuantum);
        }
        self.time_quantum = ticks;
        log::info!("time quantum set to {} ticks", ticks);
        Ok(())
    }

    /// Choose the next process and apply aging.
    ///
    /// Under `PriorityAging` every Ready process ages by one, then the
    /// winner drops back to its static priority. The idle process is only
    /// chosen when nothing else is Ready and never ages.
    pub fn select(&mut self, table: &mut ProcessTable) -> Option<Pid> {
        let pid = self.pick(table)?;
        if self.policy == SchedulingPolicy::PriorityAging {
            for pcb in table.slots_mut().iter_mut() {
                if pcb.is_ready() && !pcb.is_idle() {
                    pcb.dynamic_priority = pcb.dynamic_priority.saturating_add(1);
                }
            }
            if let Some(pcb) = table.get_mut(pid) {
                pcb.dynamic_priority = pcb.priority.level();
            }
        }
        self.cursor = Some(pid.slot());
        Some(pid)
    }

    fn pick(&self, table: &ProcessTable) -> Option<Pid> {
        let runnable = |pcb: &&ProcessControlBlock| pcb.is_ready() && !pcb.is_idle();
        let slots = table.slots();

        let chosen = match self.policy {
            SchedulingPolicy::RoundRobin => self.queue_order(slots).find(runnable),
            SchedulingPolicy::StrictPriority => {
                self.queue_order(slots)
                    .filter(runnable)
                    .fold(None, |best: Option<&ProcessControlBlock>, pcb| match best {
                        Some(b) if b.priority >= pcb.priority => Some(b),
                        _ => Some(pcb),
                    })
            }
            SchedulingPolicy::PriorityAging => {
                slots
                    .iter()
                    .filter(runnable)
                    .fold(None, |best: Option<&ProcessControlBlock>, pcb| match best {
                        Some(b) if b.dynamic_priority >= pcb.dynamic_priority => Some(b),
                        _ => Some(pcb),
                    })
            }
        };

        chosen
            .or_else(|| slots.iter().find(|pcb| pcb.is_idle() && pcb.is_ready()))
            .map(|pcb| pcb.pid)
    }

    /// Slots starting after the last dispatched one, wrapping around
    fn queue_order<'a>(
        &self,
        slots: &'a [ProcessControlBlock],
    ) -> impl Iterator<Item = &'a ProcessControlBlock> + 'a {
        let start = self.cursor.map_or(0, |c| c + 1);
        let len = slots.len();
        (0..len).map(move |i| &slots[(start + i) % len])
    }

    /// Make `pid` the Current process with a fresh quantum
    fn dispatch_to(&mut self, table: &mut ProcessTable, pid: Pid) {
        let quantum = self.time_quantum;
        let pcb = match table.get_mut(pid) {
            Some(pcb) => pcb,
            None => unreachable!("dispatch to terminated pid {}", pid),
        };
        pcb.state = ProcessState::Current;
        pcb.quantum_remaining = quantum;
        pcb.dispatch_count += 1;
        if pcb.context.first_run {
            pcb.context.first_run = false;
            log::debug!("first dispatch of '{}' pid {}", pcb.name, pid);
        }
        if pcb.is_idle() {
            self.idle_dispatches += 1;
        }
        self.dispatches += 1;
        table.set_current(Some(pid));
    }

    /// Pick a successor for `outgoing`, whose state the caller has already
    /// moved out of Current (or which has exited).
    pub fn reschedule(&mut self, table: &mut ProcessTable, outgoing: Option<Pid>) -> Dispatch {
        let from = outgoing.filter(|&pid| table.get(pid).is_some());
        match self.select(table) {
            Some(to) if Some(to) == from => {
                self.dispatch_to(table, to);
                Dispatch::Stay
            }
            Some(to) => {
                self.dispatch_to(table, to);
                self.context_switches += 1;
                log::trace!("switch {:?} -> {}", from, to);
                Dispatch::Switch { from, to }
            }
            None => {
                table.set_current(None);
                if self.boot_saved {
                    self.boot_saved = false;
                    self.context_switches += 1;
                    log::debug!("no ready process, returning to launcher");
                    Dispatch::ReturnToBoot { from }
                } else {
                    log::warn!("no ready process and no idle process");
                    Dispatch::Halt { from }
                }
            }
        }
    }

    /// First dispatch out of the boot context, which is abandoned
    pub fn start(&mut self, table: &mut ProcessTable) -> Dispatch {
        match self.select(table) {
            Some(to) => {
                let fresh = table.get(to).map_or(false, |pcb| pcb.context.first_run);
                self.dispatch_to(table, to);
                self.context_switches += 1;
                if fresh {
                    Dispatch::Bootstrap { to }
                } else {
                    Dispatch::Switch { from: None, to }
                }
            }
            None => {
                log::warn!("start: no ready process");
                Dispatch::Halt { from: None }
            }
        }
    }

    /// First dispatch out of a context that gets control back once nothing
    /// is Ready
    pub fn launch(&mut self, table: &mut ProcessTable) -> Dispatch {
        match self.select(table) {
            Some(to) => {
                self.dispatch_to(table, to);
                self.boot_saved = true;
                self.context_switches += 1;
                Dispatch::Launch { to }
            }
            None => Dispatch::Stay,
        }
    }

    /// Current gives up the CPU
    pub fn yield_current(&mut self, table: &mut ProcessTable) -> KernelResult<Dispatch> {
        let pid = table.current_pid().ok_or(KernelError::NoCurrentProcess)?;
        if let Some(pcb) = table.get_mut(pid) {
            pcb.state = ProcessState::Ready;
        }
        Ok(self.reschedule(table, Some(pid)))
    }

    /// Charge one tick to the current process; an expired quantum yields
    pub fn tick(&mut self, table: &mut ProcessTable) -> KernelResult<Dispatch> {
        self.ticks += 1;
        let pid = table.current_pid().ok_or(KernelError::NoCurrentProcess)?;
        let pcb = table.get_mut(pid).ok_or(KernelError::NoCurrentProcess)?;
        pcb.cpu_ticks += 1;
        pcb.quantum_remaining = pcb.quantum_remaining.saturating_sub(1);
        if pcb.quantum_remaining > 0 {
            return Ok(Dispatch::Stay);
        }
        log::trace!("quantum of pid {} expired", pid);
        self.yield_current(table)
    }

    /// Next process to run to completion in batch mode, in table order
    pub fn next_batch(&mut self, table: &mut ProcessTable) -> Option<Pid> {
        let pid = table
            .slots()
            .iter()
            .find(|pcb| pcb.is_ready() && !pcb.is_idle())
            .map(|pcb| pcb.pid)?;
        self.cursor = Some(pid.slot());
        self.dispatch_to(table, pid);
        Some(pid)
    }

    pub fn stats(&self, table: &ProcessTable) -> SchedulerStats {
        SchedulerStats {
            policy: self.policy,
            mode: self.mode,
            time_quantum: self.time_quantum,
            current: table.current_pid(),
            quantum_remaining: table.current().map_or(0, |pcb| pcb.quantum_remaining),
            dispatches: self.dispatches,
            context_switches: self.context_switches,
            idle_dispatches: self.idle_dispatches,
            ticks: self.ticks,
            ready: table.count(ProcessState::Ready),
            sleeping: table.count(ProcessState::Sleeping),
            waiting: table.count(ProcessState::Waiting),
        }
    }
}
