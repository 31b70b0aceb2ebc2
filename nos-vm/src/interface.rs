//! External collaborator interfaces.
//!
//! The manager drives the hardware page table, the swap disk, and backing
//! files exclusively through these traits. The embedding kernel supplies
//! real implementations; the test suite supplies in-memory fakes.

use alloc::sync::Arc;

use crate::error::Result;
use crate::layout::{PhysAddr, VirtAddr};

/// One hardware page table, owned by exactly one address space.
///
/// All operations are keyed by page-aligned virtual address; the manager
/// never inspects page-table internals. The accessed and dirty bits are
/// hardware-maintained on real targets and drive the eviction policy and
/// the file write-back decision respectively.
pub trait HardwarePageTable: Send {
    /// Installs a virtual-to-physical mapping.
    ///
    /// # Returns
    /// * `Err(VmError::MapFailed)` if the entry cannot be installed
    fn map(&mut self, va: VirtAddr, pa: PhysAddr, writable: bool) -> Result<()>;

    /// Removes the mapping for `va`, if any.
    fn unmap(&mut self, va: VirtAddr);

    /// Checks the hardware dirty bit for the page at `va`.
    fn is_dirty(&self, va: VirtAddr) -> bool;

    /// Sets or clears the hardware dirty bit for the page at `va`.
    fn set_dirty(&mut self, va: VirtAddr, dirty: bool);

    /// Checks the hardware accessed bit for the page at `va`.
    fn is_accessed(&self, va: VirtAddr) -> bool;

    /// Sets or clears the hardware accessed bit for the page at `va`.
    fn set_accessed(&mut self, va: VirtAddr, accessed: bool);
}

/// Sector-addressed disk used as the swap device.
///
/// Sectors are [`SECTOR_SIZE`](crate::layout::SECTOR_SIZE) bytes. The swap
/// table is sized at initialization from `sector_count()` divided by
/// [`SECTORS_PER_PAGE`](crate::layout::SECTORS_PER_PAGE).
pub trait BlockDevice: Send {
    /// Total number of sectors on the device.
    fn sector_count(&self) -> usize;

    /// Reads one sector into `buf`.
    fn read(&mut self, sector: usize, buf: &mut [u8]) -> Result<()>;

    /// Writes one sector from `buf`.
    fn write(&mut self, sector: usize, buf: &[u8]) -> Result<()>;
}

/// An open backing file for file-backed pages.
///
/// Handles are shared as `Arc<dyn VmFile>`; all access is by absolute byte
/// offset so a handle carries no cursor state of its own.
pub trait VmFile: Send + Sync {
    /// File length in bytes.
    fn length(&self) -> u64;

    /// Reads up to `buf.len()` bytes at `offset`; returns the count read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes `buf` at `offset`; returns the count written.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Duplicates the handle so a mapping's lifetime is independent of the
    /// caller's handle.
    fn reopen(&self) -> Result<Arc<dyn VmFile>>;
}
