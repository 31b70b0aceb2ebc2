//! Supplemental page table: the per-address-space record of what should be
//! mapped where.

use alloc::boxed::Box;
use hashbrown::HashMap;

use crate::error::{Result, VmError};
use crate::interface::HardwarePageTable;
use crate::layout::VirtAddr;
use crate::page::PageId;

/// Identity of one address space registered with the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub(crate) u64);

/// One address space: its hardware page table, its supplemental page table,
/// and the stack-bottom tracking value used by stack growth.
pub(crate) struct AddressSpace {
    pub(crate) pt: Box<dyn HardwarePageTable>,
    spt: HashMap<VirtAddr, PageId>,
    pub(crate) stack_bottom: VirtAddr,
}

impl AddressSpace {
    pub(crate) fn new(pt: Box<dyn HardwarePageTable>, stack_bottom: VirtAddr) -> Self {
        Self {
            pt,
            spt: HashMap::new(),
            stack_bottom,
        }
    }

    /// Looks up the page containing `va`; the key is the page boundary.
    pub(crate) fn find(&self, va: VirtAddr) -> Option<PageId> {
        self.spt.get(&va.page_round_down()).copied()
    }

    /// Registers a page. Overlapping declarations are a caller error,
    /// surfaced as a failure rather than an overwrite.
    pub(crate) fn insert(&mut self, va: VirtAddr, page: PageId) -> Result<()> {
        debug_assert!(va.is_page_aligned());
        if self.spt.contains_key(&va) {
            return Err(VmError::AlreadyMapped);
        }
        self.spt.insert(va, page);
        Ok(())
    }

    pub(crate) fn remove(&mut self, va: VirtAddr) -> Option<PageId> {
        self.spt.remove(&va.page_round_down())
    }

    pub(crate) fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.spt.values().copied()
    }

    pub(crate) fn addresses(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        self.spt.keys().copied()
    }

    pub(crate) fn page_count(&self) -> usize {
        self.spt.len()
    }
}
