//! Memory management
//!
//! Physical frame allocation, per-address-space page trees, demand
//! paging, file-backed and copy-on-write mappings, page-out, and the
//! cross-address-space copy helpers the syscall layer marshals through.
//!
//! All physical memory is reached through a permanent direct map at
//! `PHYS_MEM_OFFSET`. On bare metal the bootloader provides it; on the
//! host a leaked, page-aligned arena stands in for RAM so the exact same
//! page-table and frame code runs under the std test harness.

pub mod context;
pub mod fault;
pub mod heap;
pub mod page;
pub mod pmm;
pub mod swap;
pub mod usercopy;
pub mod vmm;

#[cfg(test)]
mod tests;

use core::sync::atomic::{AtomicU64, Ordering};

/// Size of a physical frame and of a small page.
pub const FRAME_SIZE: usize = 4096;
/// Size of a huge page (2 MiB on x86-64).
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Lowest usable user-space address (page 0 never maps).
pub const USER_SPACE_BASE: usize = 0x1000;
/// One past the highest user-space address.
pub const USER_SPACE_LIMIT: usize = 0x0000_7FFF_FFFF_F000;
/// Kernel dynamic area in the canonical higher half.
pub const KERNEL_SPACE_BASE: usize = 0xFFFF_9000_0000_0000;
pub const KERNEL_SPACE_LIMIT: usize = 0xFFFF_E000_0000_0000;

/// Window the THIRTY_TWO_BIT allocation flag confines results to.
pub const DMA32_BASE: usize = 0x1000;
pub const DMA32_LIMIT: usize = 0xFFFF_F000;

/// Virtual-minus-physical offset of the direct map.
static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

pub fn set_phys_mem_offset(offset: u64) {
    PHYS_MEM_OFFSET.store(offset, Ordering::Release);
}

/// Kernel-addressable pointer for a physical address.
pub fn phys_to_virt(phys: u64) -> *mut u8 {
    let offset = PHYS_MEM_OFFSET.load(Ordering::Acquire);
    (offset.wrapping_add(phys)) as *mut u8
}

/// Read `len` bytes of physical memory into `buf`.
pub fn read_phys(phys: u64, buf: &mut [u8]) {
    // SAFETY: the direct map covers every frame the PMM hands out.
    unsafe {
        core::ptr::copy_nonoverlapping(phys_to_virt(phys), buf.as_mut_ptr(), buf.len());
    }
}

/// Write `buf` into physical memory at `phys`.
pub fn write_phys(phys: u64, buf: &[u8]) {
    // SAFETY: as for `read_phys`.
    unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr(), phys_to_virt(phys), buf.len());
    }
}

pub fn zero_phys(phys: u64, len: usize) {
    // SAFETY: as for `read_phys`.
    unsafe {
        core::ptr::write_bytes(phys_to_virt(phys), 0, len);
    }
}

/// Host-only memory bring-up: back "physical" frames with a leaked
/// page-aligned arena and point the direct map at it. Idempotent so every
/// test can call it.
#[cfg(not(target_os = "none"))]
pub fn init_for_host() {
    static INIT: spin::Once<()> = spin::Once::new();
    INIT.call_once(|| {
        const ARENA_FRAMES: usize = 8192; // 32 MiB
        const BASE_PHYS: u64 = 0x10_0000;
        let layout =
            core::alloc::Layout::from_size_align(ARENA_FRAMES * FRAME_SIZE, FRAME_SIZE).unwrap();
        // SAFETY: layout is non-zero; the arena lives for the process.
        let arena = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!arena.is_null(), "host arena allocation failed");
        set_phys_mem_offset(arena as u64 - BASE_PHYS);
        pmm::init(BASE_PHYS, ARENA_FRAMES);
        crate::arch::mmu::set_kernel_root(0);
    });
}

/// Bare-metal memory bring-up from the bootloader handoff.
#[cfg(target_os = "none")]
pub fn init_from_boot_info(boot_info: &'static bootloader_api::BootInfo) {
    let offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");
    set_phys_mem_offset(offset);

    let mut largest: Option<(u64, u64)> = None;
    for region in boot_info.memory_regions.iter() {
        if region.kind == bootloader_api::info::MemoryRegionKind::Usable {
            let len = region.end - region.start;
            if largest.map(|(_, l)| len > l).unwrap_or(true) {
                largest = Some((region.start, len));
            }
        }
    }
    let (start, len) = largest.expect("no usable memory region");
    // The heap comes first: the PMM bitmap lives in it.
    heap::init();
    pmm::init(start, (len as usize) / FRAME_SIZE);
    crate::arch::mmu::set_kernel_root(crate::arch::mmu::read_root());
}
