//! The polymorphic page abstraction.
//!
//! A page is declared `Pending` with the backing it will eventually have,
//! and resolves to `Anon` or `File` exactly once, inside its first swap-in.
//! The reverse transition never happens. Dispatch is by pattern match on
//! the current variant.

use alloc::sync::Arc;

use crate::error::{Result, VmError};
use crate::frame::FrameId;
use crate::interface::VmFile;
use crate::layout::VirtAddr;
use crate::spt::SpaceId;
use crate::swap::SwapSlot;

/// Identity of one page across the manager's arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PageId(pub(crate) u64);

/// The eventual backing of a page, reported by introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Backed by the swap device once evicted; discarded on destroy.
    Anon,
    /// Backed by a region of an open file; dirty contents write back.
    File,
}

/// What a declared page will be backed by. A page can only ever be declared
/// as eventually anonymous or file-backed; the pending resting state before
/// the first fault is internal and not expressible here.
#[derive(Clone)]
pub enum Backing {
    /// Zero-filled on first touch, swap-backed thereafter.
    Anon,
    /// Lazily loaded from a file region.
    File(LoadDescriptor),
}

impl Backing {
    pub(crate) fn kind(&self) -> PageKind {
        match self {
            Backing::Anon => PageKind::Anon,
            Backing::File(_) => PageKind::File,
        }
    }
}

/// Where a file-backed page's contents live: a file handle, a byte offset,
/// and how many bytes of the page are actually in the file. The remainder
/// of the page reads as zero and is never written back.
#[derive(Clone)]
pub struct LoadDescriptor {
    /// Backing file handle, shared across the pages of one mapping.
    pub file: Arc<dyn VmFile>,
    /// Byte offset of this page's contents within the file.
    pub offset: u64,
    /// In-file bytes of this page; at most one page.
    pub read_bytes: usize,
}

impl LoadDescriptor {
    /// Fills `buf` with this page's contents: `read_bytes` from the file,
    /// zeroes past that. A short read means the file shrank underneath the
    /// mapping and is surfaced as an I/O error.
    pub(crate) fn load_into(&self, buf: &mut [u8]) -> Result<()> {
        debug_assert!(self.read_bytes <= buf.len());
        let n = self.file.read_at(&mut buf[..self.read_bytes], self.offset)?;
        if n != self.read_bytes {
            return Err(VmError::IoError);
        }
        buf[self.read_bytes..].fill(0);
        Ok(())
    }

    /// Writes the in-file portion of the page back to its region.
    pub(crate) fn write_back(&self, buf: &[u8]) -> Result<()> {
        let n = self.file.write_at(&buf[..self.read_bytes], self.offset)?;
        if n != self.read_bytes {
            return Err(VmError::IoError);
        }
        Ok(())
    }
}

/// Current variant of a page.
pub(crate) enum PageState {
    /// Declared but never faulted in; holds the declared backing.
    Pending(Backing),
    /// Anonymous memory. `slot` is `Some` exactly while the contents sit on
    /// the swap device; holding a frame and holding a slot are mutually
    /// exclusive.
    Anon { slot: Option<SwapSlot> },
    /// File-backed memory.
    File { desc: LoadDescriptor },
}

/// One virtual page within one address space.
pub(crate) struct Page {
    pub(crate) space: SpaceId,
    pub(crate) va: VirtAddr,
    pub(crate) writable: bool,
    pub(crate) state: PageState,
    /// Attached frame while resident; symmetric with the pool's
    /// back-reference.
    pub(crate) frame: Option<FrameId>,
}

impl Page {
    /// Eventual backing kind, resolving through `Pending`.
    pub(crate) fn kind(&self) -> PageKind {
        match &self.state {
            PageState::Pending(backing) => backing.kind(),
            PageState::Anon { .. } => PageKind::Anon,
            PageState::File { .. } => PageKind::File,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.state, PageState::Pending(_))
    }

    pub(crate) fn holds_swap_slot(&self) -> bool {
        matches!(self.state, PageState::Anon { slot: Some(_) })
    }
}
