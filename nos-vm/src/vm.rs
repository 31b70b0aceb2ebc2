//! The virtual memory manager: the shared frame pool, the swap table, the
//! page arena, and every registered address space.
//!
//! All mutation flows through `&mut VmManager`; the embedding kernel wraps
//! the manager in a `spin::Mutex` so frame-table and swap-table updates are
//! serialized across processes. The advisory filesystem lock is shared with
//! general file I/O via [`VmManager::fs_lock`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use hashbrown::HashMap;
use spin::Mutex;

use crate::error::{Result, VmError};
use crate::frame::{FrameId, FramePool};
use crate::interface::{BlockDevice, HardwarePageTable};
use crate::layout::{Layout, VirtAddr, PAGE_SIZE, SECTORS_PER_PAGE};
use crate::page::{Backing, Page, PageId, PageKind, PageState};
use crate::spt::{AddressSpace, SpaceId};
use crate::swap::{self, SwapTable};

/// Manager construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Number of physical frames in the shared pool.
    pub frames: usize,
    /// User address-space layout.
    pub layout: Layout,
}

/// Point-in-time resource usage, for diagnostics and tests.
#[derive(Debug, Clone, Copy)]
pub struct VmStats {
    /// Total frames in the pool
    pub total_frames: usize,
    /// Frames currently free
    pub free_frames: usize,
    /// Frames currently backing a page
    pub resident_frames: usize,
    /// Total swap slots
    pub swap_slots: usize,
    /// Swap slots currently holding evicted page contents
    pub swap_slots_used: usize,
    /// Registered address spaces
    pub spaces: usize,
    /// Registered pages across all spaces
    pub pages: usize,
}

/// Point-in-time view of one registered page.
#[derive(Debug, Clone, Copy)]
pub struct PageInfo {
    /// Eventual backing kind
    pub kind: PageKind,
    /// Still pending its first fault
    pub pending: bool,
    /// Declared writable
    pub writable: bool,
    /// Currently backed by a frame
    pub resident: bool,
    /// Index of the attached frame, if resident
    pub frame: Option<usize>,
    /// Contents currently on the swap device
    pub swap_slot: bool,
}

/// How the contents of one source page reach the destination during an
/// address-space copy.
enum CopyPlan {
    /// Re-register with the same backing; lazy semantics preserved.
    Lazy(Backing),
    /// Declare, claim, and fill with an independent byte copy.
    Eager(Backing, Vec<u8>),
    /// Like `Eager`, but the bytes sit in the parent's swap slot and are
    /// read non-destructively at copy time.
    EagerFromSwap(crate::swap::SwapSlot),
}

/// The demand-paged virtual memory manager.
pub struct VmManager {
    layout: Layout,
    frames: FramePool,
    swap: SwapTable,
    swap_dev: Box<dyn BlockDevice>,
    spaces: HashMap<SpaceId, AddressSpace>,
    pages: HashMap<PageId, Page>,
    fs_lock: Arc<Mutex<()>>,
    next_space: u64,
    next_page: u64,
}

impl VmManager {
    /// Creates a manager with `config.frames` physical frames and a swap
    /// table sized from the swap device's capacity.
    pub fn new(config: VmConfig, swap_dev: Box<dyn BlockDevice>) -> Self {
        let slots = swap_dev.sector_count() / SECTORS_PER_PAGE;
        log::info!(
            "vm manager: {} frames, {} swap slots",
            config.frames,
            slots
        );
        Self {
            layout: config.layout,
            frames: FramePool::new(config.frames),
            swap: SwapTable::new(slots),
            swap_dev,
            spaces: HashMap::new(),
            pages: HashMap::new(),
            fs_lock: Arc::new(Mutex::new(())),
            next_space: 0,
            next_page: 0,
        }
    }

    /// The advisory lock serializing filesystem access. Held by the manager
    /// around mmap setup and teardown; the kernel shares it with its file
    /// I/O paths.
    pub fn fs_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.fs_lock)
    }

    /// The configured address-space layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    // ========================================================================
    // Address-space lifecycle
    // ========================================================================

    /// Registers a new address space owning the given hardware page table.
    /// The stack-bottom tracking value starts at the top of the stack region.
    pub fn create_space(&mut self, pt: Box<dyn HardwarePageTable>) -> SpaceId {
        let id = SpaceId(self.next_space);
        self.next_space += 1;
        self.spaces
            .insert(id, AddressSpace::new(pt, self.layout.stack_top));
        id
    }

    /// Destroys every remaining page of the space and releases it. Dirty
    /// file-backed data is written back and swap slots are freed before any
    /// frame returns to the pool.
    pub fn destroy_space(&mut self, space: SpaceId) -> Result<()> {
        if !self.spaces.contains_key(&space) {
            return Err(VmError::NoSuchSpace);
        }
        let result = self.clear_space(space);
        self.spaces.remove(&space);
        result
    }

    /// Current stack-bottom tracking value for the space.
    pub fn stack_bottom(&self, space: SpaceId) -> Result<VirtAddr> {
        Ok(self
            .spaces
            .get(&space)
            .ok_or(VmError::NoSuchSpace)?
            .stack_bottom)
    }

    /// Records the stack bottom; called by the process loader once the
    /// initial stack page is in place.
    pub fn set_stack_bottom(&mut self, space: SpaceId, va: VirtAddr) -> Result<()> {
        self.spaces
            .get_mut(&space)
            .ok_or(VmError::NoSuchSpace)?
            .stack_bottom = va;
        Ok(())
    }

    // ========================================================================
    // Declare / claim / remove
    // ========================================================================

    /// Registers a pending page at `va` with the given eventual backing.
    /// The page stays unresident until its first claim.
    ///
    /// # Returns
    /// * `Err(VmError::AlreadyMapped)` if a page is already declared at `va`
    pub fn declare(
        &mut self,
        space: SpaceId,
        va: VirtAddr,
        writable: bool,
        backing: Backing,
    ) -> Result<()> {
        if !va.is_page_aligned() || self.layout.is_kernel(va) {
            return Err(VmError::InvalidArgument);
        }
        let spt = self.spaces.get_mut(&space).ok_or(VmError::NoSuchSpace)?;
        let id = PageId(self.next_page);
        spt.insert(va, id)?;
        self.next_page += 1;
        self.pages.insert(
            id,
            Page {
                space,
                va,
                writable,
                state: PageState::Pending(backing),
                frame: None,
            },
        );
        Ok(())
    }

    /// Makes the page containing `va` resident. This is the single path by
    /// which a page transitions from non-resident to resident; it is used by
    /// the fault handler and by eager copy during fork.
    pub fn claim(&mut self, space: SpaceId, va: VirtAddr) -> Result<()> {
        let id = self.lookup(space, va)?;
        self.claim_by_id(id)
    }

    /// Destroys the page containing `va` and drops its table entry. Dirty
    /// file-backed contents are written back first.
    pub fn remove_page(&mut self, space: SpaceId, va: VirtAddr) -> Result<()> {
        let va = va.page_round_down();
        let id = self.lookup(space, va)?;
        let result = self.destroy_page(id);
        if let Some(spt) = self.spaces.get_mut(&space) {
            spt.remove(va);
        }
        self.pages.remove(&id);
        result
    }

    // ========================================================================
    // Address-space duplication (fork)
    // ========================================================================

    /// Populates the empty space `dst` with copies of every page in `src`.
    ///
    /// Pending pages keep their lazy semantics; anonymous pages are claimed
    /// eagerly with fully independent contents (parent and child must
    /// diverge); file-backed pages are re-registered against the same
    /// descriptor, with resident parents copied eagerly so the two spaces
    /// never alias one frame. On any failure the destination is torn back
    /// down to empty.
    pub fn copy_space(&mut self, dst: SpaceId, src: SpaceId) -> Result<()> {
        if dst == src {
            return Err(VmError::InvalidArgument);
        }
        if !self.spaces.contains_key(&src) {
            return Err(VmError::NoSuchSpace);
        }
        let dst_space = self.spaces.get(&dst).ok_or(VmError::NoSuchSpace)?;
        if dst_space.page_count() != 0 {
            return Err(VmError::InvalidArgument);
        }
        let src_pages: Vec<PageId> = self
            .spaces
            .get(&src)
            .ok_or(VmError::NoSuchSpace)?
            .pages()
            .collect();
        let result = self.copy_pages(dst, &src_pages);
        if result.is_err() {
            // No partially populated table survives a failed copy.
            let _ = self.clear_space(dst);
        }
        result
    }

    fn copy_pages(&mut self, dst: SpaceId, src_pages: &[PageId]) -> Result<()> {
        for &src_id in src_pages {
            let (va, writable, plan) = {
                let page = self.pages.get(&src_id).ok_or(VmError::NotMapped)?;
                let plan = match &page.state {
                    PageState::Pending(backing) => CopyPlan::Lazy(backing.clone()),
                    PageState::Anon { slot } => match (page.frame, slot) {
                        (Some(fid), _) => {
                            CopyPlan::Eager(Backing::Anon, self.frames.data(fid).to_vec())
                        }
                        (None, Some(slot)) => CopyPlan::EagerFromSwap(*slot),
                        // An anonymous page with neither frame nor slot has
                        // no contents yet; the child starts from zeroes.
                        (None, None) => CopyPlan::Eager(Backing::Anon, vec![0u8; PAGE_SIZE]),
                    },
                    PageState::File { desc } => match page.frame {
                        Some(fid) => CopyPlan::Eager(
                            Backing::File(desc.clone()),
                            self.frames.data(fid).to_vec(),
                        ),
                        None => CopyPlan::Lazy(Backing::File(desc.clone())),
                    },
                };
                (page.va, page.writable, plan)
            };
            match plan {
                CopyPlan::Lazy(backing) => self.declare(dst, va, writable, backing)?,
                CopyPlan::Eager(backing, bytes) => {
                    self.declare(dst, va, writable, backing)?;
                    self.claim(dst, va)?;
                    self.fill_resident(dst, va, &bytes)?;
                }
                CopyPlan::EagerFromSwap(slot) => {
                    self.declare(dst, va, writable, Backing::Anon)?;
                    self.claim(dst, va)?;
                    let mut bytes = vec![0u8; PAGE_SIZE];
                    swap::read_slot(self.swap_dev.as_mut(), slot, &mut bytes)?;
                    self.fill_resident(dst, va, &bytes)?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // User-memory access
    // ========================================================================

    /// Reads memory through the space's mappings, claiming non-resident
    /// pages on demand and maintaining the accessed bits the way hardware
    /// loads would.
    pub fn read_bytes(&mut self, space: SpaceId, va: VirtAddr, buf: &mut [u8]) -> Result<()> {
        let mut addr = va.0;
        let mut filled = 0;
        while filled < buf.len() {
            let page_va = VirtAddr(addr).page_round_down();
            let offset = addr - page_va.0;
            let n = (PAGE_SIZE - offset).min(buf.len() - filled);
            let id = self.lookup(space, page_va)?;
            self.claim_by_id(id)?;
            let fid = self
                .pages
                .get(&id)
                .and_then(|p| p.frame)
                .ok_or(VmError::NotMapped)?;
            buf[filled..filled + n].copy_from_slice(&self.frames.data(fid)[offset..offset + n]);
            if let Some(s) = self.spaces.get_mut(&space) {
                s.pt.set_accessed(page_va, true);
            }
            filled += n;
            addr += n;
        }
        Ok(())
    }

    /// Writes memory through the space's mappings, claiming non-resident
    /// pages on demand and setting the accessed and dirty bits the way
    /// hardware stores would.
    ///
    /// # Returns
    /// * `Err(VmError::WriteProtected)` on a store to a read-only page
    pub fn write_bytes(&mut self, space: SpaceId, va: VirtAddr, data: &[u8]) -> Result<()> {
        let mut addr = va.0;
        let mut written = 0;
        while written < data.len() {
            let page_va = VirtAddr(addr).page_round_down();
            let offset = addr - page_va.0;
            let n = (PAGE_SIZE - offset).min(data.len() - written);
            let id = self.lookup(space, page_va)?;
            if !self.pages.get(&id).ok_or(VmError::NotMapped)?.writable {
                return Err(VmError::WriteProtected);
            }
            self.claim_by_id(id)?;
            let fid = self
                .pages
                .get(&id)
                .and_then(|p| p.frame)
                .ok_or(VmError::NotMapped)?;
            self.frames.data_mut(fid)[offset..offset + n]
                .copy_from_slice(&data[written..written + n]);
            if let Some(s) = self.spaces.get_mut(&space) {
                s.pt.set_accessed(page_va, true);
                s.pt.set_dirty(page_va, true);
            }
            written += n;
            addr += n;
        }
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current resource usage.
    pub fn stats(&self) -> VmStats {
        VmStats {
            total_frames: self.frames.len(),
            free_frames: self.frames.free_count(),
            resident_frames: self.frames.in_use(),
            swap_slots: self.swap.slot_count(),
            swap_slots_used: self.swap.in_use(),
            spaces: self.spaces.len(),
            pages: self.pages.len(),
        }
    }

    /// View of the page containing `va`, if one is registered.
    pub fn page_info(&self, space: SpaceId, va: VirtAddr) -> Option<PageInfo> {
        let spt = self.spaces.get(&space)?;
        let page = self.pages.get(&spt.find(va)?)?;
        Some(PageInfo {
            kind: page.kind(),
            pending: page.is_pending(),
            writable: page.writable,
            resident: page.frame.is_some(),
            frame: page.frame.map(|f| f.0),
            swap_slot: page.holds_swap_slot(),
        })
    }

    /// The space and address of the page bound to a frame, if any.
    pub fn frame_owner(&self, frame: usize) -> Option<(SpaceId, VirtAddr)> {
        let id = self.frames.page_of(FrameId(frame))?;
        let page = self.pages.get(&id)?;
        Some((page.space, page.va))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn lookup(&self, space: SpaceId, va: VirtAddr) -> Result<PageId> {
        self.spaces
            .get(&space)
            .ok_or(VmError::NoSuchSpace)?
            .find(va)
            .ok_or(VmError::NotMapped)
    }

    pub(crate) fn lookup_opt(&self, space: SpaceId, va: VirtAddr) -> Option<PageId> {
        self.spaces.get(&space)?.find(va)
    }

    /// The claim protocol: acquire a frame, bind it bidirectionally,
    /// install the hardware mapping, then run the type-specific swap-in.
    /// A claim on an already-resident page is a no-op.
    pub(crate) fn claim_by_id(&mut self, id: PageId) -> Result<()> {
        let (space, va, writable, resident) = {
            let page = self.pages.get(&id).ok_or(VmError::NotMapped)?;
            (page.space, page.va, page.writable, page.frame.is_some())
        };
        if resident {
            return Ok(());
        }
        if !self.spaces.contains_key(&space) {
            return Err(VmError::NoSuchSpace);
        }
        let fid = self.acquire_frame()?;
        self.frames.bind(fid, id);
        if let Some(page) = self.pages.get_mut(&id) {
            page.frame = Some(fid);
        }
        let pa = self.frames.phys(fid);
        let mapped = match self.spaces.get_mut(&space) {
            Some(s) => s.pt.map(va, pa, writable),
            None => Err(VmError::NoSuchSpace),
        };
        if let Err(e) = mapped {
            // No leaked binding on a failed install.
            self.unbind_and_free(id, fid);
            return Err(e);
        }
        if let Err(e) = self.swap_in(id, fid) {
            if let Some(s) = self.spaces.get_mut(&space) {
                s.pt.unmap(va);
            }
            self.unbind_and_free(id, fid);
            return Err(e);
        }
        Ok(())
    }

    /// Obtains a usable frame: a zero-filled free one, or the victim of an
    /// eviction scan once the pool is exhausted.
    fn acquire_frame(&mut self) -> Result<FrameId> {
        if let Some(fid) = self.frames.take_free() {
            return Ok(fid);
        }
        let victim = self.select_victim()?;
        self.evict_frame(victim)?;
        Ok(victim)
    }

    /// Second-chance scan over the clock queue in insertion order: an
    /// accessed page gets its bit cleared and is skipped; the first page
    /// found with the bit clear is the victim. A full scan without a hit
    /// falls back to the head of the queue.
    fn select_victim(&mut self) -> Result<FrameId> {
        let Self {
            frames,
            spaces,
            pages,
            ..
        } = self;
        let order = frames.clock_order();
        if order.is_empty() {
            log::error!("frame pool empty with nothing evictable");
            return Err(VmError::OutOfFrames);
        }
        for &fid in &order {
            let Some(id) = frames.page_of(fid) else {
                continue;
            };
            let Some(page) = pages.get(&id) else {
                continue;
            };
            let Some(space) = spaces.get_mut(&page.space) else {
                continue;
            };
            if space.pt.is_accessed(page.va) {
                space.pt.set_accessed(page.va, false);
            } else {
                return Ok(fid);
            }
        }
        Ok(order[0])
    }

    /// Swaps out the victim's page and leaves the frame unbound for the
    /// caller to reuse.
    fn evict_frame(&mut self, victim: FrameId) -> Result<()> {
        let Some(id) = self.frames.page_of(victim) else {
            return Ok(());
        };
        self.swap_out(id)
    }

    /// Type-specific swap-out: anonymous contents go to a fresh swap slot;
    /// dirty file-backed contents write back to the file. The frame link
    /// and the hardware mapping are cleared on success.
    fn swap_out(&mut self, id: PageId) -> Result<()> {
        let Self {
            frames,
            swap,
            swap_dev,
            spaces,
            pages,
            ..
        } = self;
        let page = pages.get_mut(&id).ok_or(VmError::NotMapped)?;
        let fid = page.frame.ok_or(VmError::NotMapped)?;
        let space = spaces.get_mut(&page.space).ok_or(VmError::NoSuchSpace)?;
        match &mut page.state {
            PageState::Pending(_) => {
                // A pending page was never resident; finding one bound to a
                // frame is a misconfiguration, not a retryable condition.
                log::error!("attempted to evict a pending page at {:#x}", page.va.0);
                return Err(VmError::InvalidArgument);
            }
            PageState::Anon { slot } => {
                let s = swap.alloc()?;
                if let Err(e) = swap::write_slot(swap_dev.as_mut(), s, frames.data(fid)) {
                    swap.free(s);
                    return Err(e);
                }
                log::trace!("anon page {:#x} -> swap slot {}", page.va.0, s.0);
                *slot = Some(s);
            }
            PageState::File { desc } => {
                if space.pt.is_dirty(page.va) {
                    desc.write_back(frames.data(fid))?;
                    space.pt.set_dirty(page.va, false);
                }
            }
        }
        log::debug!("evicting frame {} (va {:#x})", fid.0, page.va.0);
        page.frame = None;
        space.pt.unmap(page.va);
        frames.clear_binding(fid);
        Ok(())
    }

    /// Type-specific swap-in, filling the already-bound frame and resolving
    /// a pending page's variant exactly once.
    fn swap_in(&mut self, id: PageId, fid: FrameId) -> Result<()> {
        enum Source {
            Zero,
            File(crate::page::LoadDescriptor),
            Swap(crate::swap::SwapSlot),
        }
        let source = {
            let page = self.pages.get(&id).ok_or(VmError::NotMapped)?;
            match &page.state {
                PageState::Pending(Backing::Anon) => Source::Zero,
                PageState::Pending(Backing::File(desc)) => Source::File(desc.clone()),
                PageState::Anon { slot: Some(s) } => Source::Swap(*s),
                // An anonymous page swaps in only from a recorded slot.
                PageState::Anon { slot: None } => return Err(VmError::InvalidArgument),
                PageState::File { desc } => Source::File(desc.clone()),
            }
        };
        match &source {
            Source::Zero => self.frames.data_mut(fid).fill(0),
            Source::File(desc) => desc.load_into(self.frames.data_mut(fid))?,
            Source::Swap(s) => {
                swap::read_slot(self.swap_dev.as_mut(), *s, self.frames.data_mut(fid))?;
                log::trace!("swap slot {} -> frame {}", s.0, fid.0);
            }
        }
        let Self { swap, pages, .. } = self;
        if let Some(page) = pages.get_mut(&id) {
            let previous = mem::replace(&mut page.state, PageState::Anon { slot: None });
            page.state = match previous {
                PageState::Pending(Backing::Anon) => PageState::Anon { slot: None },
                PageState::Pending(Backing::File(desc)) => PageState::File { desc },
                PageState::Anon { slot } => {
                    if let Some(s) = slot {
                        swap.free(s);
                    }
                    PageState::Anon { slot: None }
                }
                file @ PageState::File { .. } => file,
            };
        }
        Ok(())
    }

    /// Destroys a page in place: write-back and swap-slot release happen
    /// before its frame returns to the pool, so a subsequent acquire never
    /// observes stale content.
    fn destroy_page(&mut self, id: PageId) -> Result<()> {
        let Self {
            frames,
            swap,
            spaces,
            pages,
            ..
        } = self;
        let page = pages.get_mut(&id).ok_or(VmError::NotMapped)?;
        let space = spaces.get_mut(&page.space).ok_or(VmError::NoSuchSpace)?;
        let mut write_err = None;
        match &mut page.state {
            PageState::Pending(_) => {}
            PageState::Anon { slot } => {
                // Anonymous data with no further reader is discarded; a
                // still-held slot is released rather than leaked.
                if let Some(s) = slot.take() {
                    swap.free(s);
                }
            }
            PageState::File { desc } => {
                if let Some(fid) = page.frame {
                    if space.pt.is_dirty(page.va) {
                        if let Err(e) = desc.write_back(frames.data(fid)) {
                            write_err = Some(e);
                        }
                        space.pt.set_dirty(page.va, false);
                    }
                }
            }
        }
        if let Some(fid) = page.frame.take() {
            frames.release(fid);
        }
        space.pt.unmap(page.va);
        match write_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroys every page of the space, keeping the space itself.
    /// Continues past individual failures and reports the first one.
    fn clear_space(&mut self, space: SpaceId) -> Result<()> {
        let addrs: Vec<VirtAddr> = match self.spaces.get(&space) {
            Some(s) => s.addresses().collect(),
            None => return Err(VmError::NoSuchSpace),
        };
        let mut first_err = None;
        for va in addrs {
            if let Err(e) = self.remove_page(space, va) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn unbind_and_free(&mut self, id: PageId, fid: FrameId) {
        if let Some(page) = self.pages.get_mut(&id) {
            page.frame = None;
        }
        self.frames.release(fid);
    }

    /// Overwrites a resident page's frame without touching the hardware
    /// dirty bit; used by eager copy, which populates through the kernel
    /// rather than through the user mapping.
    fn fill_resident(&mut self, space: SpaceId, va: VirtAddr, bytes: &[u8]) -> Result<()> {
        let id = self.lookup(space, va)?;
        let fid = self
            .pages
            .get(&id)
            .and_then(|p| p.frame)
            .ok_or(VmError::NotMapped)?;
        self.frames.data_mut(fid)[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
