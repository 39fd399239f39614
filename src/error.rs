//! Kernel error types
//!
//! Every fallible kernel operation returns [`KernelResult`]. Failures leave
//! the allocator and the process table exactly as they were.

use core::fmt;

use crate::process::pcb::Pid;

/// Kernel result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Coarse classification of a [`KernelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Process table full or arena exhausted
    ResourceExhausted,
    /// Caller passed something the kernel cannot use
    InvalidArgument,
    /// Unknown pid, or no process is running
    NotFound,
    /// Allocator detected a bad or repeated free
    CorruptionDetected,
    /// Operation not possible in the kernel's current mode
    InvalidState,
}

/// Kernel error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No Terminated slot left in the process table
    TableFull,
    /// No free block large enough for the request
    OutOfMemory { requested: usize },
    /// Arena cannot hold even one minimal block
    ArenaTooSmall { size: usize },
    /// Process entry point missing
    InvalidEntry,
    /// Allocation of zero bytes
    ZeroSizeAllocation,
    /// Time quantum of zero ticks
    InvalidTimeQuantum,
    /// The idle process cannot block or be terminated
    IdleProcess,
    /// No live process with this pid
    NotFound(Pid),
    /// Operation needs a Current process
    NoCurrentProcess,
    /// Freed address is not the start of any block payload
    InvalidPointer { address: usize },
    /// Block is already free
    DoubleFree { address: usize },
    /// Blocking call while the scheduler runs processes to completion
    BatchMode,
    /// Context switching is not available on this target, or the operation
    /// does not apply to the configured dispatch mode
    Unsupported,
    /// Kernel singleton used before init
    NotInitialized,
    /// Kernel singleton or logger initialised twice
    AlreadyInitialized,
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::TableFull | KernelError::OutOfMemory { .. } => ErrorKind::ResourceExhausted,
            KernelError::ArenaTooSmall { .. }
            | KernelError::InvalidEntry
            | KernelError::ZeroSizeAllocation
            | KernelError::InvalidTimeQuantum
            | KernelError::IdleProcess => ErrorKind::InvalidArgument,
            KernelError::NotFound(_) | KernelError::NoCurrentProcess => ErrorKind::NotFound,
            KernelError::InvalidPointer { .. } | KernelError::DoubleFree { .. } => {
                ErrorKind::CorruptionDetected
            }
            KernelError::BatchMode
            | KernelError::Unsupported
            | KernelError::NotInitialized
            | KernelError::AlreadyInitialized => ErrorKind::InvalidState,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::TableFull => write!(f, "Process table full"),
            KernelError::OutOfMemory { requested } => {
                write!(f, "Out of memory ({} bytes requested)", requested)
            }
            KernelError::ArenaTooSmall { size } => write!(f, "Arena too small ({} bytes)", size),
            KernelError::InvalidEntry => write!(f, "Invalid entry point"),
            KernelError::ZeroSizeAllocation => write!(f, "Zero-size allocation"),
            KernelError::InvalidTimeQuantum => write!(f, "Time quantum must be at least one tick"),
            KernelError::IdleProcess => write!(f, "Operation not allowed on the idle process"),
            KernelError::NotFound(pid) => write!(f, "Process {} not found", pid),
            KernelError::NoCurrentProcess => write!(f, "No current process"),
            KernelError::InvalidPointer { address } => {
                write!(f, "Invalid pointer 0x{:x} passed to free", address)
            }
            KernelError::DoubleFree { address } => write!(f, "Double free of 0x{:x}", address),
            KernelError::BatchMode => write!(f, "Blocking call in batch dispatch mode"),
            KernelError::Unsupported => write!(f, "Not supported by this target or dispatch mode"),
            KernelError::NotInitialized => write!(f, "Kernel not initialized"),
            KernelError::AlreadyInitialized => write!(f, "Already initialized"),
        }
    }
}
