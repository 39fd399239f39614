// Process Management Module for Kestrel
pub mod context;
pub mod event;
pub mod pcb;
pub mod scheduler;
pub mod table;

pub use context::Transfer;
pub use pcb::{
    EntryPoint, EventId, Pid, ProcessControlBlock, ProcessInfo, ProcessKind, ProcessPriority,
    ProcessState, SavedContext, StackRegion,
};
pub use scheduler::{Dispatch, DispatchMode, Scheduler, SchedulerStats, SchedulingPolicy};
pub use table::ProcessTable;
