//! Error types for the virtual memory manager.

use core::fmt;

/// Common error type used throughout the virtual memory manager.
///
/// Errors propagate to the immediate caller and are never retried
/// internally; the caller decides whether a failure terminates the faulting
/// process or aborts the current multi-page operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No free frame and no evictable victim
    OutOfFrames,
    /// No free swap slot; swap space exhaustion is a hard failure
    SwapExhausted,
    /// A page is already registered at this virtual address
    AlreadyMapped,
    /// No page is registered at this virtual address
    NotMapped,
    /// Hardware page-table mapping installation failed
    MapFailed,
    /// The faulting access cannot be resolved and the process must terminate
    IllegalAccess,
    /// Write to a write-protected page; copy-on-write is not implemented
    WriteProtected,
    /// Invalid argument or invalid page state for the requested operation
    InvalidArgument,
    /// The address space does not exist
    NoSuchSpace,
    /// Swap device or backing file I/O failed
    IoError,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfFrames => write!(f, "Out of physical frames"),
            VmError::SwapExhausted => write!(f, "Swap space exhausted"),
            VmError::AlreadyMapped => write!(f, "Virtual address already mapped"),
            VmError::NotMapped => write!(f, "Virtual address not mapped"),
            VmError::MapFailed => write!(f, "Hardware mapping installation failed"),
            VmError::IllegalAccess => write!(f, "Illegal memory access"),
            VmError::WriteProtected => write!(f, "Write to write-protected page"),
            VmError::InvalidArgument => write!(f, "Invalid argument"),
            VmError::NoSuchSpace => write!(f, "No such address space"),
            VmError::IoError => write!(f, "I/O error"),
        }
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, VmError>;
