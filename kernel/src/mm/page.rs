//! Page descriptors
//!
//! One descriptor per virtual page of an address space, carrying the
//! translation, the protection and lifecycle flags, and — for file-backed
//! pages — the link to the mapped region and through it to the page
//! cache. Descriptors live in their context's ordered page tree keyed by
//! virtual address.

use alloc::sync::{Arc, Weak};

use crate::mm::{FRAME_SIZE, HUGE_PAGE_SIZE};

bitflags::bitflags! {
    /// Hardware-visible protection of a page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const PRESENT = 1 << 0;
        const RW = 1 << 1;
        const USER = 1 << 2;
        const EXEC = 1 << 3;
        const HUGE = 1 << 4;
        const UNCACHED = 1 << 5;
        const WRITE_COMBINE = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Lifecycle state of a page descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageState: u32 {
        /// Faulted in at least once.
        const TOUCHED = 1 << 0;
        const ACCESSED = 1 << 1;
        const DIRTY = 1 << 2;
        /// Eligible for page-out.
        const PAGEABLE = 1 << 3;
        /// Address space reservation only; no storage.
        const RESERVED = 1 << 4;
        /// Guard page: any access is refused.
        const GUARD = 1 << 5;
        /// Private copy-on-write of a page-cache frame.
        const PRIVATE_COW = 1 << 6;
        /// Evicted; `phys` holds a swap id, not a frame.
        const PAGED_OUT = 1 << 7;
        /// Member of the context's working-set list.
        const IN_WORKING_SET = 1 << 8;
        /// `phys` is a swap identifier (tracks PAGED_OUT).
        const SWAP_PHYS = 1 << 9;
        /// Demand-zero page not yet materialized.
        const DEMAND = 1 << 10;
        /// The descriptor owns its physical frame (anonymous memory or a
        /// split COW copy); freed with the descriptor. Cache-owned frames
        /// never set this.
        const OWNS_FRAME = 1 << 11;
    }
}

/// A file mapping: the window of a vnode's page cache a context mapped.
///
/// Linked from both sides: the owning context keeps an `Arc` per region,
/// the page cache keeps a weak back-reference so write-back can find all
/// mappings of a file.
pub struct MappedRegion {
    pub base: usize,
    pub size: usize,
    pub file_off: u64,
    pub cache: Arc<crate::fs::pagecache::PageCache>,
    pub ctx: Weak<super::context::MmContext>,
    /// Copy-on-write mapping: writes split off private frames.
    pub private: bool,
    /// Whether the backing file handle permits writes; gates the shared
    /// write-promotion fault.
    pub writable: bool,
}

pub struct PageDescriptor {
    pub vaddr: usize,
    /// Physical frame base while mapped; swap id when SWAP_PHYS.
    pub phys: u64,
    pub prot: Protection,
    pub state: PageState,
    /// LRU age; bumped by the working-set scan, cleared on access.
    pub age: u8,
    pub region: Option<Arc<MappedRegion>>,
}

impl PageDescriptor {
    pub fn new(vaddr: usize, prot: Protection) -> Self {
        Self {
            vaddr,
            phys: 0,
            prot,
            state: PageState::empty(),
            age: 0,
            region: None,
        }
    }

    /// Bytes this descriptor spans.
    pub fn size(&self) -> usize {
        if self.prot.contains(Protection::HUGE) {
            HUGE_PAGE_SIZE
        } else {
            FRAME_SIZE
        }
    }

    pub fn end(&self) -> usize {
        self.vaddr + self.size()
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.vaddr && addr < self.end()
    }

    pub fn is_present(&self) -> bool {
        self.prot.contains(Protection::PRESENT)
    }

    /// Offset of this page inside its file mapping's cache.
    pub fn cache_offset(&self) -> Option<u64> {
        let region = self.region.as_ref()?;
        Some(region.file_off + (self.vaddr - region.base) as u64)
    }
}
