//! Memory-mapped files.
//!
//! A mapping is a contiguous run of file-backed pages declared against a
//! private reopen of the caller's file handle, so closing the original
//! descriptor never invalidates the mapping. Setup and teardown run under
//! the shared filesystem lock.

use alloc::sync::Arc;

use crate::error::{Result, VmError};
use crate::interface::VmFile;
use crate::layout::{VirtAddr, PAGE_SIZE};
use crate::page::{Backing, LoadDescriptor, PageKind};
use crate::spt::SpaceId;
use crate::vm::VmManager;

impl VmManager {
    /// Maps `length` bytes of `file` starting at `offset` into the space at
    /// `addr`. Pages load lazily on first fault; bytes past the end of the
    /// file read as zero and are never written back.
    ///
    /// Either every page of the run is registered or none is: a collision
    /// partway through rolls back the pages declared so far.
    ///
    /// # Returns
    /// * `Ok(addr)` on success
    /// * `Err(VmError::InvalidArgument)` for a null, unaligned, or
    ///   kernel-range address, an unaligned offset, a zero length, or a
    ///   file with no bytes to map at `offset`
    pub fn mmap(
        &mut self,
        space: SpaceId,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn VmFile>,
        offset: u64,
    ) -> Result<VirtAddr> {
        if addr.is_null()
            || !addr.is_page_aligned()
            || offset % PAGE_SIZE as u64 != 0
            || length == 0
        {
            return Err(VmError::InvalidArgument);
        }
        let page_count = length.div_ceil(PAGE_SIZE);
        // length is caller-controlled; the page-rounded span can overflow.
        let span = page_count
            .checked_mul(PAGE_SIZE)
            .ok_or(VmError::InvalidArgument)?;
        let end = addr.0.checked_add(span).ok_or(VmError::InvalidArgument)?;
        if self.layout().is_kernel(addr) || end > self.layout().kernel_base.0 {
            return Err(VmError::InvalidArgument);
        }
        let fs_lock = self.fs_lock();
        let _fs = fs_lock.lock();
        // The mapping gets its own handle so the caller can close theirs.
        let mfile = file.reopen()?;
        let readable = (mfile.length().saturating_sub(offset)).min(length as u64) as usize;
        if readable == 0 {
            return Err(VmError::InvalidArgument);
        }
        log::debug!(
            "mmap {} pages at {:#x} (offset {:#x}, {} file bytes)",
            page_count,
            addr.0,
            offset,
            readable
        );
        let mut remaining = readable;
        for i in 0..page_count {
            let va = VirtAddr(addr.0 + i * PAGE_SIZE);
            let page_read = remaining.min(PAGE_SIZE);
            let desc = LoadDescriptor {
                file: Arc::clone(&mfile),
                offset: offset + (i * PAGE_SIZE) as u64,
                read_bytes: page_read,
            };
            if let Err(e) = self.declare(space, va, writable, Backing::File(desc)) {
                for j in 0..i {
                    let _ = self.remove_page(space, VirtAddr(addr.0 + j * PAGE_SIZE));
                }
                return Err(e);
            }
            remaining -= page_read;
        }
        Ok(addr)
    }

    /// Unmaps the file-backed run starting at `addr`, writing dirty pages
    /// back to the file. The walk stops at the first address that is not a
    /// file-backed page; unmapping an address with no mapping is a no-op.
    pub fn munmap(&mut self, space: SpaceId, addr: VirtAddr) -> Result<()> {
        let fs_lock = self.fs_lock();
        let _fs = fs_lock.lock();
        let mut va = addr.page_round_down();
        let mut first_err = None;
        loop {
            let Some(info) = self.page_info(space, va) else {
                break;
            };
            if info.kind != PageKind::File {
                break;
            }
            log::debug!("munmap page at {:#x}", va.0);
            if let Err(e) = self.remove_page(space, va) {
                first_err.get_or_insert(e);
            }
            va = VirtAddr(va.0 + PAGE_SIZE);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
