//! Kernel heap (bare metal)
//!
//! The global allocator is a `linked_list_allocator::LockedHeap` seeded
//! from a static bootstrap region so allocation works before the PMM is
//! up; `extend` grows it once the VMM can hand out kernel ranges. Host
//! builds use the std system allocator instead (see `lib.rs`).

#[cfg(target_os = "none")]
mod imp {
    const BOOTSTRAP_HEAP_SIZE: usize = 2 * 1024 * 1024;

    static mut BOOTSTRAP_HEAP: [u8; BOOTSTRAP_HEAP_SIZE] = [0; BOOTSTRAP_HEAP_SIZE];

    pub fn init() {
        // SAFETY: the bootstrap region is handed to the allocator exactly
        // once and never touched directly afterwards.
        unsafe {
            crate::ALLOCATOR
                .lock()
                .init(core::ptr::addr_of_mut!(BOOTSTRAP_HEAP) as *mut u8, BOOTSTRAP_HEAP_SIZE);
        }
    }

    /// Grow the heap after the VMM maps more kernel memory directly past
    /// the current end.
    ///
    /// # Safety
    ///
    /// The `size` bytes following the heap's current end must be mapped,
    /// writable kernel memory owned by the heap from now on.
    pub unsafe fn extend(size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { crate::ALLOCATOR.lock().extend(size) };
    }
}

#[cfg(target_os = "none")]
pub use imp::{extend, init};

#[cfg(not(target_os = "none"))]
pub fn init() {}
