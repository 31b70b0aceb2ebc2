//! Memory-mapped file behavior: lazy loading, the zero tail, dirty
//! write-back, transactional setup, and unmap boundaries.

mod common;

use common::{new_manager, new_space, FakeFile};
use nos_vm::{Backing, FaultFlags, FaultInfo, VirtAddr, VmError, PAGE_SIZE};

const MAP_AT: VirtAddr = VirtAddr(0x10_0000);

fn file_of(len: usize, byte: u8) -> std::sync::Arc<FakeFile> {
    FakeFile::new(vec![byte; len])
}

#[test]
fn test_mmap_is_lazy_until_fault() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(2 * PAGE_SIZE, 0x42);
    vm.mmap(s, MAP_AT, 2 * PAGE_SIZE, true, &file.as_dyn(), 0)
        .unwrap();

    for i in 0..2 {
        let info = vm
            .page_info(s, VirtAddr(MAP_AT.0 + i * PAGE_SIZE))
            .unwrap();
        assert!(info.pending);
        assert!(!info.resident);
    }
    assert_eq!(vm.stats().resident_frames, 0);

    let mut buf = [0u8; 8];
    vm.read_bytes(s, VirtAddr(MAP_AT.0 + PAGE_SIZE), &mut buf)
        .unwrap();
    assert_eq!(buf, [0x42; 8]);
    // Only the faulted page became resident.
    assert_eq!(vm.stats().resident_frames, 1);
}

#[test]
fn test_mmap_zero_fills_past_end_of_file() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    // 5000 bytes: the second page holds 904 file bytes and a zero tail.
    let file = file_of(5000, 0x33);
    vm.mmap(s, MAP_AT, 2 * PAGE_SIZE, true, &file.as_dyn(), 0)
        .unwrap();

    let mut buf = vec![0xffu8; PAGE_SIZE];
    vm.read_bytes(s, VirtAddr(MAP_AT.0 + PAGE_SIZE), &mut buf)
        .unwrap();
    assert!(buf[..904].iter().all(|b| *b == 0x33));
    assert!(buf[904..].iter().all(|b| *b == 0));
}

#[test]
fn test_munmap_writes_back_dirty_pages() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(2 * PAGE_SIZE, 0);
    vm.mmap(s, MAP_AT, 2 * PAGE_SIZE, true, &file.as_dyn(), 0)
        .unwrap();
    vm.write_bytes(s, MAP_AT, &[9, 9, 9]).unwrap();

    vm.munmap(s, MAP_AT).unwrap();
    let contents = file.contents();
    assert_eq!(&contents[..3], &[9, 9, 9]);
    assert!(vm.page_info(s, MAP_AT).is_none());
    assert!(vm.page_info(s, VirtAddr(MAP_AT.0 + PAGE_SIZE)).is_none());
}

#[test]
fn test_munmap_write_back_stays_in_file_bounds() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(5000, 0);
    vm.mmap(s, MAP_AT, 2 * PAGE_SIZE, true, &file.as_dyn(), 0)
        .unwrap();
    // Dirty the zero tail of the second page as well as its file bytes.
    vm.write_bytes(s, VirtAddr(MAP_AT.0 + PAGE_SIZE), &vec![7u8; PAGE_SIZE])
        .unwrap();
    vm.munmap(s, MAP_AT).unwrap();

    let contents = file.contents();
    assert_eq!(contents.len(), 5000);
    assert!(contents[4096..5000].iter().all(|b| *b == 7));
}

#[test]
fn test_munmap_skips_clean_pages() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(PAGE_SIZE, 0x10);
    vm.mmap(s, MAP_AT, PAGE_SIZE, true, &file.as_dyn(), 0).unwrap();
    let mut buf = [0u8; 16];
    vm.read_bytes(s, MAP_AT, &mut buf).unwrap();

    vm.munmap(s, MAP_AT).unwrap();
    assert_eq!(file.write_count(), 0);
}

#[test]
fn test_eviction_writes_back_dirty_file_page() {
    let mut vm = new_manager(1, 8);
    let s = new_space(&mut vm);
    let file = file_of(PAGE_SIZE, 0);
    vm.mmap(s, MAP_AT, PAGE_SIZE, true, &file.as_dyn(), 0).unwrap();
    vm.write_bytes(s, MAP_AT, &[5, 5]).unwrap();

    // Forcing another page in evicts the mapping's only frame; the dirty
    // contents must land in the file, not on the swap device.
    vm.declare(s, VirtAddr(0x1000), true, Backing::Anon).unwrap();
    vm.claim(s, VirtAddr(0x1000)).unwrap();

    assert_eq!(&file.contents()[..2], &[5, 5]);
    assert_eq!(vm.stats().swap_slots_used, 0);
    let info = vm.page_info(s, MAP_AT).unwrap();
    assert!(!info.resident);
    assert!(!info.swap_slot);

    // Faulting it back reloads the written contents from the file.
    let mut buf = [0u8; 2];
    vm.read_bytes(s, MAP_AT, &mut buf).unwrap();
    assert_eq!(buf, [5, 5]);
}

#[test]
fn test_evicted_clean_file_page_not_written_back() {
    let mut vm = new_manager(1, 8);
    let s = new_space(&mut vm);
    let file = file_of(PAGE_SIZE, 0x61);
    vm.mmap(s, MAP_AT, PAGE_SIZE, false, &file.as_dyn(), 0).unwrap();
    let mut buf = [0u8; 1];
    vm.read_bytes(s, MAP_AT, &mut buf).unwrap();

    vm.declare(s, VirtAddr(0x1000), true, Backing::Anon).unwrap();
    vm.claim(s, VirtAddr(0x1000)).unwrap();
    assert_eq!(file.write_count(), 0);
}

#[test]
fn test_mmap_rejects_invalid_arguments() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(PAGE_SIZE, 0);
    let f = file.as_dyn();
    let kernel_base = vm.layout().kernel_base;

    // Unaligned address.
    assert_eq!(
        vm.mmap(s, VirtAddr(0x1234), PAGE_SIZE, true, &f, 0),
        Err(VmError::InvalidArgument)
    );
    // Null address.
    assert_eq!(
        vm.mmap(s, VirtAddr(0), PAGE_SIZE, true, &f, 0),
        Err(VmError::InvalidArgument)
    );
    // Zero length.
    assert_eq!(
        vm.mmap(s, MAP_AT, 0, true, &f, 0),
        Err(VmError::InvalidArgument)
    );
    // Unaligned offset.
    assert_eq!(
        vm.mmap(s, MAP_AT, PAGE_SIZE, true, &f, 100),
        Err(VmError::InvalidArgument)
    );
    // Offset at or past the end of the file leaves nothing to map.
    assert_eq!(
        vm.mmap(s, MAP_AT, PAGE_SIZE, true, &f, PAGE_SIZE as u64),
        Err(VmError::InvalidArgument)
    );
    // Run crossing into kernel space.
    assert_eq!(
        vm.mmap(
            s,
            VirtAddr(kernel_base.0 - PAGE_SIZE),
            2 * PAGE_SIZE,
            true,
            &f,
            0
        ),
        Err(VmError::InvalidArgument)
    );
    // A length whose page-rounded span overflows must not wrap past the
    // kernel-range check.
    assert_eq!(
        vm.mmap(s, MAP_AT, usize::MAX, true, &f, 0),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(
        vm.mmap(s, MAP_AT, usize::MAX - PAGE_SIZE, true, &f, 0),
        Err(VmError::InvalidArgument)
    );
    // None of the rejected calls left pages behind.
    assert_eq!(vm.stats().pages, 0);
}

#[test]
fn test_mmap_rolls_back_on_collision() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let blocker = VirtAddr(MAP_AT.0 + 2 * PAGE_SIZE);
    vm.declare(s, blocker, true, Backing::Anon).unwrap();

    let file = file_of(3 * PAGE_SIZE, 0x77);
    assert_eq!(
        vm.mmap(s, MAP_AT, 3 * PAGE_SIZE, true, &file.as_dyn(), 0),
        Err(VmError::AlreadyMapped)
    );
    // Nothing from the failed mapping survives; the blocker does.
    assert!(vm.page_info(s, MAP_AT).is_none());
    assert!(vm.page_info(s, VirtAddr(MAP_AT.0 + PAGE_SIZE)).is_none());
    assert!(vm.page_info(s, blocker).is_some());
}

#[test]
fn test_munmap_stops_at_non_file_page() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(2 * PAGE_SIZE, 0x21);
    vm.mmap(s, MAP_AT, 2 * PAGE_SIZE, true, &file.as_dyn(), 0)
        .unwrap();
    let anon = VirtAddr(MAP_AT.0 + 2 * PAGE_SIZE);
    vm.declare(s, anon, true, Backing::Anon).unwrap();

    vm.munmap(s, MAP_AT).unwrap();
    assert!(vm.page_info(s, MAP_AT).is_none());
    assert!(vm.page_info(s, VirtAddr(MAP_AT.0 + PAGE_SIZE)).is_none());
    assert!(vm.page_info(s, anon).is_some());

    // Faulting on the unmapped run afterwards is an illegal access.
    let fault = FaultInfo {
        addr: MAP_AT,
        flags: FaultFlags::NOT_PRESENT | FaultFlags::USER,
        stack_pointer: vm.layout().stack_top,
    };
    assert_eq!(vm.handle_fault(s, &fault), Err(VmError::IllegalAccess));
}

#[test]
fn test_munmap_of_unmapped_address_is_noop() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    vm.munmap(s, MAP_AT).unwrap();
}

#[test]
fn test_mapping_outlives_original_handle() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(PAGE_SIZE, 0x55);
    {
        let handle = file.as_dyn();
        vm.mmap(s, MAP_AT, PAGE_SIZE, true, &handle, 0).unwrap();
    }
    let mut buf = [0u8; 4];
    vm.read_bytes(s, MAP_AT, &mut buf).unwrap();
    assert_eq!(buf, [0x55; 4]);
}

#[test]
fn test_shrunk_file_surfaces_io_error() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let file = file_of(PAGE_SIZE, 0x13);
    vm.mmap(s, MAP_AT, PAGE_SIZE, true, &file.as_dyn(), 0).unwrap();

    // The file shrinks underneath the still-pending mapping.
    file.truncate(100);
    let mut buf = [0u8; 4];
    assert_eq!(vm.read_bytes(s, MAP_AT, &mut buf), Err(VmError::IoError));
}

#[test]
fn test_mmap_offset_reads_right_region() {
    let mut vm = new_manager(4, 8);
    let s = new_space(&mut vm);
    let mut contents = vec![0u8; 2 * PAGE_SIZE];
    contents[PAGE_SIZE..].fill(0x99);
    let file = FakeFile::new(contents);
    vm.mmap(s, MAP_AT, PAGE_SIZE, false, &file.as_dyn(), PAGE_SIZE as u64)
        .unwrap();

    let mut buf = [0u8; 8];
    vm.read_bytes(s, MAP_AT, &mut buf).unwrap();
    assert_eq!(buf, [0x99; 8]);
}
