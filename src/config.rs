// Kernel configuration for Kestrel
use crate::error::{KernelError, KernelResult};
use crate::process::pcb::EntryPoint;
use crate::process::scheduler::{DispatchMode, SchedulingPolicy};

/// Number of PCB slots in the process table
pub const MAX_PROCESSES: usize = 16;

/// Smallest stack a process may be created with (bytes)
pub const MIN_STACK_SIZE: usize = 256;

/// Stack size used when the caller has no preference (bytes)
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Stack size of the reserved idle process (bytes)
pub const IDLE_STACK_SIZE: usize = 1024;

/// Time quantum in ticks
pub const DEFAULT_TIME_QUANTUM: u32 = 5;

/// Size of the arena managed by the first-fit allocator (process stacks + kmalloc)
pub const KERNEL_ARENA_SIZE: usize = 128 * 1024;

/// Size of the heap backing `alloc` collections on bare metal
pub const RUST_HEAP_SIZE: usize = 256 * 1024;

/// Process names are truncated to this many bytes
pub const PROCESS_NAME_MAX: usize = 32;

/// Runtime configuration handed to the kernel at init
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub policy: SchedulingPolicy,
    pub dispatch_mode: DispatchMode,
    pub time_quantum: u32,
    /// Reserved idle process, run only when nothing else is Ready
    pub idle: Option<EntryPoint>,
    pub idle_stack_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::PriorityAging,
            dispatch_mode: DispatchMode::ContextSwitch,
            time_quantum: DEFAULT_TIME_QUANTUM,
            idle: None,
            idle_stack_size: IDLE_STACK_SIZE,
        }
    }
}

impl KernelConfig {
    pub fn with_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn with_time_quantum(mut self, ticks: u32) -> Self {
        self.time_quantum = ticks;
        self
    }

    pub fn with_idle(mut self, entry: EntryPoint) -> Self {
        self.idle = Some(entry);
        self
    }

    /// Check the values that cannot be expressed by the types alone
    pub fn validate(&self) -> KernelResult<()> {
        if self.time_quantum == 0 {
            return Err(KernelError::InvalidTimeQuantum);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_priority_aging_with_context_switch() {
        let config = KernelConfig::default();
        assert_eq!(config.policy, SchedulingPolicy::PriorityAging);
        assert_eq!(config.dispatch_mode, DispatchMode::ContextSwitch);
        assert_eq!(config.time_quantum, DEFAULT_TIME_QUANTUM);
        assert!(config.idle.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_quantum_is_rejected() {
        let config = KernelConfig::default().with_time_quantum(0);
        assert_eq!(config.validate(), Err(KernelError::InvalidTimeQuantum));
    }
}
