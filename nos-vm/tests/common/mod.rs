//! In-memory fakes for the hardware traits, shared by the integration
//! suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nos_vm::interface::{BlockDevice, HardwarePageTable, VmFile};
use nos_vm::{
    PhysAddr, Result, SpaceId, VirtAddr, VmConfig, VmError, VmManager, SECTORS_PER_PAGE,
    SECTOR_SIZE,
};

struct Entry {
    pa: PhysAddr,
    writable: bool,
    dirty: bool,
    accessed: bool,
}

/// Hardware page table backed by a hash map, with a switch that makes
/// every subsequent map attempt fail.
pub struct FakePageTable {
    entries: HashMap<VirtAddr, Entry>,
    fail_maps: Arc<AtomicBool>,
}

impl FakePageTable {
    pub fn new() -> Self {
        Self::with_fail_flag(Arc::new(AtomicBool::new(false)))
    }

    pub fn with_fail_flag(fail_maps: Arc<AtomicBool>) -> Self {
        Self {
            entries: HashMap::new(),
            fail_maps,
        }
    }
}

impl HardwarePageTable for FakePageTable {
    fn map(&mut self, va: VirtAddr, pa: PhysAddr, writable: bool) -> Result<()> {
        if self.fail_maps.load(Ordering::Relaxed) {
            return Err(VmError::MapFailed);
        }
        self.entries.insert(
            va,
            Entry {
                pa,
                writable,
                dirty: false,
                accessed: false,
            },
        );
        Ok(())
    }

    fn unmap(&mut self, va: VirtAddr) {
        self.entries.remove(&va);
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).is_some_and(|e| e.dirty)
    }

    fn set_dirty(&mut self, va: VirtAddr, dirty: bool) {
        if let Some(e) = self.entries.get_mut(&va) {
            e.dirty = dirty;
        }
    }

    fn is_accessed(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).is_some_and(|e| e.accessed)
    }

    fn set_accessed(&mut self, va: VirtAddr, accessed: bool) {
        if let Some(e) = self.entries.get_mut(&va) {
            e.accessed = accessed;
        }
    }
}

/// Sector-addressed disk held in a byte vector.
pub struct FakeDisk {
    data: Vec<u8>,
}

impl FakeDisk {
    /// A disk with capacity for `pages` swap slots.
    pub fn with_page_capacity(pages: usize) -> Self {
        Self {
            data: vec![0u8; pages * SECTORS_PER_PAGE * SECTOR_SIZE],
        }
    }
}

impl BlockDevice for FakeDisk {
    fn sector_count(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }

    fn read(&mut self, sector: usize, buf: &mut [u8]) -> Result<()> {
        let start = sector * SECTOR_SIZE;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(VmError::IoError);
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, sector: usize, buf: &[u8]) -> Result<()> {
        let start = sector * SECTOR_SIZE;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(VmError::IoError);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

/// Backing file over a shared byte buffer. Reopened handles share the
/// buffer, matching a filesystem where all handles see one inode.
pub struct FakeFile {
    data: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
}

impl FakeFile {
    pub fn new(contents: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Arc::new(Mutex::new(contents)),
            writes: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Shared view of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Number of `write_at` calls across all handles.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Shrinks the file in place, as an external truncation would.
    pub fn truncate(&self, len: usize) {
        self.data.lock().unwrap().truncate(len);
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn VmFile> {
        Arc::clone(self) as Arc<dyn VmFile>
    }
}

impl VmFile for FakeFile {
    fn length(&self) -> u64 {
        self.data.lock().unwrap().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.lock().unwrap();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut data = self.data.lock().unwrap();
        self.writes.fetch_add(1, Ordering::Relaxed);
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn reopen(&self) -> Result<Arc<dyn VmFile>> {
        Ok(Arc::new(FakeFile {
            data: Arc::clone(&self.data),
            writes: Arc::clone(&self.writes),
        }))
    }
}

/// A manager over `frames` physical frames and `swap_pages` swap slots,
/// using the default layout.
pub fn new_manager(frames: usize, swap_pages: usize) -> VmManager {
    VmManager::new(
        VmConfig {
            frames,
            layout: nos_vm::Layout::default(),
        },
        Box::new(FakeDisk::with_page_capacity(swap_pages)),
    )
}

/// Registers a fresh space with a plain fake page table.
pub fn new_space(vm: &mut VmManager) -> SpaceId {
    vm.create_space(Box::new(FakePageTable::new()))
}

/// One page of `byte` repeated.
pub fn page_of(byte: u8) -> Vec<u8> {
    vec![byte; nos_vm::PAGE_SIZE]
}
