//! Swap slot allocator.
//!
//! The swap device is carved into page-sized slots, one bit per slot. A bit
//! is set exactly for the interval between a successful swap-out and the
//! matching swap-in, or until the owning page is destroyed.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Result, VmError};
use crate::interface::BlockDevice;
use crate::layout::{SECTORS_PER_PAGE, SECTOR_SIZE};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// One allocated slot on the swap device, holding exactly one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SwapSlot(pub(crate) usize);

/// Bitmap of swap-device slots, sized once at initialization.
pub(crate) struct SwapTable {
    bits: Vec<u64>,
    slots: usize,
    used: usize,
}

impl SwapTable {
    /// Creates a table covering `slots` swap slots, all free.
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            bits: vec![0; slots.div_ceil(BITS_PER_WORD)],
            slots,
            used: 0,
        }
    }

    /// Claims a free slot. Swap exhaustion is a hard resource-exhaustion
    /// condition surfaced to the swap-out caller, never retried.
    pub(crate) fn alloc(&mut self) -> Result<SwapSlot> {
        for (word_idx, word) in self.bits.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let slot = word_idx * BITS_PER_WORD + bit;
            if slot >= self.slots {
                break;
            }
            *word |= 1 << bit;
            self.used += 1;
            return Ok(SwapSlot(slot));
        }
        log::error!("swap table exhausted ({} slots in use)", self.used);
        Err(VmError::SwapExhausted)
    }

    /// Returns a slot to the free pool.
    pub(crate) fn free(&mut self, slot: SwapSlot) {
        debug_assert!(self.is_allocated(slot), "freeing an unallocated swap slot");
        let word = slot.0 / BITS_PER_WORD;
        let bit = slot.0 % BITS_PER_WORD;
        self.bits[word] &= !(1 << bit);
        self.used -= 1;
    }

    pub(crate) fn is_allocated(&self, slot: SwapSlot) -> bool {
        let word = slot.0 / BITS_PER_WORD;
        let bit = slot.0 % BITS_PER_WORD;
        slot.0 < self.slots && self.bits[word] & (1 << bit) != 0
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots
    }

    pub(crate) fn in_use(&self) -> usize {
        self.used
    }
}

/// Writes one page of data to the sector run covered by `slot`.
pub(crate) fn write_slot(dev: &mut dyn BlockDevice, slot: SwapSlot, data: &[u8]) -> Result<()> {
    debug_assert_eq!(data.len(), SECTORS_PER_PAGE * SECTOR_SIZE);
    let base = slot.0 * SECTORS_PER_PAGE;
    for (i, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
        dev.write(base + i, chunk)?;
    }
    Ok(())
}

/// Reads one page of data from the sector run covered by `slot`.
pub(crate) fn read_slot(dev: &mut dyn BlockDevice, slot: SwapSlot, data: &mut [u8]) -> Result<()> {
    debug_assert_eq!(data.len(), SECTORS_PER_PAGE * SECTOR_SIZE);
    let base = slot.0 * SECTORS_PER_PAGE;
    for (i, chunk) in data.chunks_mut(SECTOR_SIZE).enumerate() {
        dev.read(base + i, chunk)?;
    }
    Ok(())
}
