//! Page geometry, address newtypes, and the user address-space layout.

use static_assertions::const_assert;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Disk sector size in bytes
pub const SECTOR_SIZE: usize = 512;
/// Number of sectors backing one page; one swap slot spans exactly this many
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(PAGE_SIZE % SECTOR_SIZE == 0);

/// Top of the user stack; the stack grows down from here.
pub const USER_STACK_TOP: VirtAddr = VirtAddr(0x4748_0000);
/// Default maximum stack size (1MB)
pub const DEFAULT_MAX_STACK: usize = 0x10_0000;
/// First kernel-space address; user mappings live strictly below this.
pub const KERNEL_BASE: VirtAddr = VirtAddr(0x8000_0000);

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// A virtual address within one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Checks if the virtual address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Rounds down to the start of the containing page.
    pub const fn page_round_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Rounds up to the next page boundary.
    pub const fn page_round_up(self) -> Self {
        Self(page_round_up(self.0))
    }

    /// Checks for the null address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

/// A physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    /// Creates a new physical address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the physical frame number for this address.
    pub const fn frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }
}

/// User address-space layout consumed by fault classification.
///
/// The stack region is the window `[stack_limit, stack_top)`; faults inside
/// it may be resolved by stack growth. Everything at or above `kernel_base`
/// is off-limits to user mappings.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    /// Top-of-stack boundary (exclusive).
    pub stack_top: VirtAddr,
    /// Maximum stack size in bytes.
    pub max_stack: usize,
    /// First kernel-space address.
    pub kernel_base: VirtAddr,
}

impl Layout {
    /// Lowest address the stack is allowed to grow to.
    pub const fn stack_limit(&self) -> VirtAddr {
        VirtAddr(self.stack_top.0 - self.max_stack)
    }

    /// Checks whether an address lies in kernel space.
    pub const fn is_kernel(&self, addr: VirtAddr) -> bool {
        addr.0 >= self.kernel_base.0
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            stack_top: USER_STACK_TOP,
            max_stack: DEFAULT_MAX_STACK,
            kernel_base: KERNEL_BASE,
        }
    }
}
