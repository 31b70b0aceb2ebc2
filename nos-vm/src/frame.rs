//! Physical frame pool.
//!
//! The pool owns a fixed number of page-sized frames shared by every
//! address space. Frames in use are tracked in a clock queue in insertion
//! order; the second-chance eviction scan over that queue lives in the
//! manager, which can reach the owning pages and their hardware tables.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use crate::layout::{PhysAddr, PAGE_SHIFT, PAGE_SIZE};
use crate::page::PageId;

/// Index of one frame in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameId(pub(crate) usize);

struct FrameSlot {
    data: Box<[u8]>,
    /// Back-reference to the page currently bound to this frame.
    /// `frame.page.frame == frame` whenever this is set.
    page: Option<PageId>,
}

pub(crate) struct FramePool {
    slots: Vec<FrameSlot>,
    free: Vec<FrameId>,
    /// In-use frames in binding order; the eviction scan walks this.
    clock: VecDeque<FrameId>,
}

impl FramePool {
    pub(crate) fn new(frame_count: usize) -> Self {
        let slots = (0..frame_count)
            .map(|_| FrameSlot {
                data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
                page: None,
            })
            .collect();
        Self {
            slots,
            free: (0..frame_count).rev().map(FrameId).collect(),
            clock: VecDeque::with_capacity(frame_count),
        }
    }

    /// Pops a free frame, zero-filled and ready to bind.
    pub(crate) fn take_free(&mut self) -> Option<FrameId> {
        let fid = self.free.pop()?;
        self.slots[fid.0].data.fill(0);
        Some(fid)
    }

    /// Binds a frame to a page and enters it into the clock queue.
    pub(crate) fn bind(&mut self, fid: FrameId, page: PageId) {
        debug_assert!(self.slots[fid.0].page.is_none());
        self.slots[fid.0].page = Some(page);
        self.clock.push_back(fid);
    }

    /// Severs the page link and drops the frame from the clock queue
    /// without freeing it; the caller reuses the frame immediately.
    pub(crate) fn clear_binding(&mut self, fid: FrameId) {
        self.slots[fid.0].page = None;
        self.clock.retain(|f| *f != fid);
    }

    /// Severs the page link and returns the frame to the free pool.
    pub(crate) fn release(&mut self, fid: FrameId) {
        self.clear_binding(fid);
        self.free.push(fid);
    }

    pub(crate) fn page_of(&self, fid: FrameId) -> Option<PageId> {
        self.slots.get(fid.0).and_then(|slot| slot.page)
    }

    /// Snapshot of the clock queue in insertion order.
    pub(crate) fn clock_order(&self) -> Vec<FrameId> {
        self.clock.iter().copied().collect()
    }

    pub(crate) fn data(&self, fid: FrameId) -> &[u8] {
        &self.slots[fid.0].data
    }

    pub(crate) fn data_mut(&mut self, fid: FrameId) -> &mut [u8] {
        &mut self.slots[fid.0].data
    }

    pub(crate) fn phys(&self, fid: FrameId) -> PhysAddr {
        PhysAddr(fid.0 << PAGE_SHIFT)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.clock.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_free_zeroes_frame() {
        let mut pool = FramePool::new(2);
        let fid = pool.take_free().unwrap();
        pool.data_mut(fid).fill(0xaa);
        pool.release(fid);
        let fid = pool.take_free().unwrap();
        assert!(pool.data(fid).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_bind_release_cycle() {
        let mut pool = FramePool::new(1);
        let fid = pool.take_free().unwrap();
        assert!(pool.take_free().is_none());
        pool.bind(fid, PageId(7));
        assert_eq!(pool.page_of(fid), Some(PageId(7)));
        assert_eq!(pool.in_use(), 1);
        pool.release(fid);
        assert_eq!(pool.page_of(fid), None);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_clock_order_is_binding_order() {
        let mut pool = FramePool::new(3);
        let a = pool.take_free().unwrap();
        let b = pool.take_free().unwrap();
        pool.bind(a, PageId(1));
        pool.bind(b, PageId(2));
        assert_eq!(pool.clock_order(), vec![a, b]);
        pool.clear_binding(a);
        assert_eq!(pool.clock_order(), vec![b]);
        assert_eq!(pool.free_count(), 1);
    }
}
