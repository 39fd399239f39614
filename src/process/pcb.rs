// Process Control Block (PCB) for Kestrel
use alloc::string::String;
use core::fmt;
use core::ptr::NonNull;

use crate::config::PROCESS_NAME_MAX;

/// Code a process starts executing at
pub type EntryPoint = extern "C" fn();

/// Process ID, equal to the process table slot it occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(raw: u32) -> Self {
        Pid(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Event a process can wait on, signalled by `wakeup`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u32);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,      // Runnable, waiting for the CPU
    Current,    // The one process executing right now
    Terminated, // Slot is free
    Sleeping,   // Waiting for its tick count to run out
    Waiting,    // Blocked on an event
}

impl ProcessState {
    pub fn label(self) -> &'static str {
        match self {
            ProcessState::Ready => "READY",
            ProcessState::Current => "RUNNING",
            ProcessState::Terminated => "FREE",
            ProcessState::Sleeping => "SLEEP",
            ProcessState::Waiting => "WAIT",
        }
    }
}

/// Process priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl ProcessPriority {
    pub fn level(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    User,
    /// Runs only when nothing else is Ready
    Idle,
}

/// Register state of a suspended process.
///
/// The registers themselves live on the process stack; only the stack
/// pointer is kept here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedContext {
    pub stack_pointer: usize,
    /// Not dispatched yet, the stack still holds the initial frame
    pub first_run: bool,
}

/// Stack memory owned by exactly one PCB
#[derive(Debug)]
pub struct StackRegion {
    base: NonNull<u8>,
    size: usize,
}

// The region is owned by one PCB and only touched through the table.
unsafe impl Send for StackRegion {}

impl StackRegion {
    pub(crate) fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest byte of the stack
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.size
    }
}

/// Process Control Block (PCB) - Core process management structure
#[derive(Debug)]
pub struct ProcessControlBlock {
    pub pid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub kind: ProcessKind,
    pub priority: ProcessPriority,
    pub dynamic_priority: u32,
    pub context: SavedContext,
    pub stack: Option<StackRegion>,
    pub entry: Option<EntryPoint>,
    pub sleep_ticks_remaining: u32,
    pub wait_event: Option<EventId>,
    pub quantum_remaining: u32,
    pub dispatch_count: u64,
    pub cpu_ticks: u64,
}

impl ProcessControlBlock {
    /// A free slot
    pub fn empty(pid: Pid) -> Self {
        Self {
            pid,
            name: String::new(),
            state: ProcessState::Terminated,
            kind: ProcessKind::User,
            priority: ProcessPriority::Low,
            dynamic_priority: 0,
            context: SavedContext::default(),
            stack: None,
            entry: None,
            sleep_ticks_remaining: 0,
            wait_event: None,
            quantum_remaining: 0,
            dispatch_count: 0,
            cpu_ticks: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state != ProcessState::Terminated
    }

    pub fn is_ready(&self) -> bool {
        self.state == ProcessState::Ready
    }

    pub fn is_idle(&self) -> bool {
        self.kind == ProcessKind::Idle
    }

    /// Clear everything the process owned, handing back its stack so the
    /// caller can release it.
    pub(crate) fn clear(&mut self) -> Option<StackRegion> {
        let stack = self.stack.take();
        *self = Self::empty(self.pid);
        stack
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            name: self.name.clone(),
            state: self.state,
            kind: self.kind,
            priority: self.priority,
            dynamic_priority: self.dynamic_priority,
            sleep_ticks_remaining: self.sleep_ticks_remaining,
            wait_event: self.wait_event,
            stack_size: self.stack.as_ref().map_or(0, StackRegion::size),
            dispatch_count: self.dispatch_count,
            cpu_ticks: self.cpu_ticks,
        }
    }
}

/// Snapshot of one process, as handed to the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub name: String,
    pub state: ProcessState,
    pub kind: ProcessKind,
    pub priority: ProcessPriority,
    pub dynamic_priority: u32,
    pub sleep_ticks_remaining: u32,
    pub wait_event: Option<EventId>,
    pub stack_size: usize,
    pub dispatch_count: u64,
    pub cpu_ticks: u64,
}

/// Cut `name` to at most `PROCESS_NAME_MAX` bytes without splitting a char
pub fn truncate_name(name: &str) -> String {
    if name.len() <= PROCESS_NAME_MAX {
        return String::from(name);
    }
    let mut end = PROCESS_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}
