//! NOS Virtual Memory
//!
//! This crate provides the demand-paged virtual memory manager: it decides
//! what backs each page of a process's address space, moves page contents
//! between physical frames, backing files, and the swap device, and resolves
//! page faults.
//!
//! # Architecture
//!
//! The manager is organized into several key modules:
//!
//! - **Layout**: Page geometry, address newtypes, and the address-space layout
//! - **Swap**: Bitmap allocator for page-sized swap-device slots
//! - **Frame**: The shared physical frame pool and its second-chance evictor
//! - **Page**: The polymorphic page abstraction (pending / anonymous / file-backed)
//! - **SPT**: Per-address-space supplemental page table
//! - **Fault**: Fault classification and stack growth
//! - **Mmap**: Memory-mapped file setup and teardown
//!
//! Hardware page tables, the swap disk, and open files are reached through
//! the traits in [`interface`]; the manager never touches platform state
//! directly, which is also what makes the whole subsystem testable on a host.
//!
//! Physical memory is strictly smaller than the sum of all virtual address
//! spaces, so every operation that needs a frame may transitively evict
//! another process's page. All operations run synchronously on the calling
//! thread and may block on disk I/O; the embedding kernel serializes access
//! to a [`VmManager`] the same way it serializes its other global allocators.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod error;
pub mod fault;
pub mod interface;
pub mod layout;

mod frame;
mod mmap;
mod page;
mod spt;
mod swap;
mod vm;

pub use error::{Result, VmError};
pub use fault::{FaultFlags, FaultInfo};
pub use layout::{Layout, PhysAddr, VirtAddr, PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
pub use page::{Backing, LoadDescriptor, PageKind};
pub use spt::SpaceId;
pub use vm::{PageInfo, VmConfig, VmManager, VmStats};
