//! Page fault handling and stack growth.

use bitflags::bitflags;

use crate::error::{Result, VmError};
use crate::layout::{VirtAddr, PAGE_SIZE};
use crate::page::Backing;
use crate::spt::SpaceId;
use crate::vm::VmManager;

bitflags! {
    /// Hardware fault cause bits, as decoded by the architecture layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultFlags: u8 {
        /// The faulting access was a write.
        const WRITE = 1 << 0;
        /// The access came from user mode.
        const USER = 1 << 1;
        /// The faulting address had no present mapping.
        const NOT_PRESENT = 1 << 2;
    }
}

/// Everything the fault handler needs from the trap frame.
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    /// The faulting virtual address.
    pub addr: VirtAddr,
    /// Decoded fault cause.
    pub flags: FaultFlags,
    /// User stack pointer at the time of the fault, used by the stack
    /// growth heuristic.
    pub stack_pointer: VirtAddr,
}

impl VmManager {
    /// Resolves a page fault: claims a registered page, grows the stack
    /// when the access fits the growth window, and rejects everything else
    /// as an illegal access the caller should turn into process
    /// termination.
    ///
    /// A present-mapping write fault is always a protection violation;
    /// there is no copy-on-write resolution.
    pub fn handle_fault(&mut self, space: SpaceId, info: &FaultInfo) -> Result<()> {
        let addr = info.addr;
        log::trace!(
            "page fault in space {:?} at {:#x} ({:?})",
            space,
            addr.0,
            info.flags
        );
        if addr.is_null() || self.layout().is_kernel(addr) {
            log::warn!("illegal access at {:#x}", addr.0);
            return Err(VmError::IllegalAccess);
        }
        if !info.flags.contains(FaultFlags::NOT_PRESENT) {
            if info.flags.contains(FaultFlags::WRITE) {
                log::warn!("write to read-only page at {:#x}", addr.0);
                return Err(VmError::WriteProtected);
            }
            return Err(VmError::IllegalAccess);
        }
        if let Some(id) = self.lookup_opt(space, addr) {
            return self.claim_by_id(id);
        }
        if self.in_stack_window(info) {
            return self.grow_stack(space, addr);
        }
        log::warn!("illegal access at {:#x}", addr.0);
        Err(VmError::IllegalAccess)
    }

    /// An unregistered access is treated as stack growth when it lands in
    /// the stack region, above the configured limit, and no lower than
    /// eight bytes below the saved stack pointer. The eight-byte grace
    /// covers push instructions that move the pointer before the store.
    fn in_stack_window(&self, info: &FaultInfo) -> bool {
        let layout = self.layout();
        let addr = info.addr.0;
        addr + 8 >= info.stack_pointer.0
            && addr >= layout.stack_limit().0
            && addr < layout.stack_top.0
    }

    /// Extends the stack page by page until the faulting address is
    /// covered, then records the new bottom.
    fn grow_stack(&mut self, space: SpaceId, addr: VirtAddr) -> Result<()> {
        let mut bottom = self.stack_bottom(space)?;
        let target = addr.page_round_down();
        while bottom > target {
            let next = VirtAddr(bottom.0 - PAGE_SIZE);
            log::debug!("growing stack to {:#x}", next.0);
            self.declare(space, next, true, Backing::Anon)?;
            self.claim(space, next)?;
            self.set_stack_bottom(space, next)?;
            bottom = next;
        }
        Ok(())
    }
}
