//! Virtual memory operations
//!
//! `alloc` / `free` / `protect` / `query_and_reserve_free_range` over an
//! address space's page tree, including guard pages, reservations,
//! file-backed mappings (shared and private copy-on-write) and the 32-bit
//! window for legacy DMA users. The fault side lives in
//! [`super::fault`], eviction in [`super::swap`].

use alloc::sync::Arc;

use super::context::{MmContext, MmInner};
use super::page::{MappedRegion, PageDescriptor, PageState, Protection};
use super::{
    DMA32_BASE, DMA32_LIMIT, FRAME_SIZE, HUGE_PAGE_SIZE, KERNEL_SPACE_BASE, KERNEL_SPACE_LIMIT,
    USER_SPACE_BASE, USER_SPACE_LIMIT,
};
use crate::arch::{mmu, tlb};
use crate::error::{Result, Status};
use crate::fs::pagecache::PageCache;
use crate::mm::pmm::{self, AllocFlags, FrameNumber};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmaFlags: u32 {
        const HUGE_PAGE = 1 << 0;
        /// Never evicted; implied for kernel stacks.
        const NON_PAGED = 1 << 1;
        /// Reserve address space without committing storage.
        const RESERVE = 1 << 2;
        /// Populate file pages at alloc time instead of on first fault.
        const PREFAULT = 1 << 3;
        /// Copy-on-write file mapping.
        const PRIVATE = 1 << 4;
        /// Prepend an inaccessible guard page.
        const GUARD_PAGE = 1 << 5;
        /// The base address is a hint; relocate on collision.
        const HINT = 1 << 6;
        /// Result (and frames) must stay below 4 GiB.
        const THIRTY_TWO_BIT = 1 << 7;
        const KERNEL_STACK = 1 << 8;
    }
}

/// File backing for a mapping: the vnode's page cache plus the window.
pub struct FileBacking {
    pub cache: Arc<PageCache>,
    pub offset: u64,
    /// Bytes of real file content from `offset`.
    pub len: u64,
    pub writable: bool,
}

fn window_for(ctx: &MmContext, flags: VmaFlags) -> (usize, usize) {
    if flags.contains(VmaFlags::THIRTY_TWO_BIT) {
        (DMA32_BASE, DMA32_LIMIT)
    } else if ctx.is_kernel() {
        (KERNEL_SPACE_BASE, KERNEL_SPACE_LIMIT)
    } else {
        (USER_SPACE_BASE, USER_SPACE_LIMIT)
    }
}

/// Lowest gap in the window that fits `size` plus one slack page.
fn find_free_range(
    inner: &MmInner,
    size: usize,
    pgsize: usize,
    window: (usize, usize),
) -> Result<usize> {
    let (base, limit) = window;
    let needed = size + pgsize;
    let mut candidate = base;
    for (_, desc) in inner.pages.range(base..limit) {
        if desc.vaddr >= candidate && desc.vaddr - candidate >= needed {
            return Ok(candidate);
        }
        if desc.end() > candidate {
            candidate = desc.end();
        }
    }
    if limit > candidate && limit - candidate >= needed {
        return Ok(candidate);
    }
    Err(Status::OutOfMemory)
}

/// Find and reserve a free virtual range without committing storage.
pub fn query_and_reserve_free_range(
    ctx: &Arc<MmContext>,
    size: usize,
    flags: VmaFlags,
) -> Result<usize> {
    alloc(
        ctx,
        None,
        size,
        Protection::empty(),
        flags | VmaFlags::RESERVE,
        None,
    )
}

/// Allocate virtual memory in `ctx`.
///
/// `hint` of `None` picks the lowest fitting gap. Returns the base of the
/// usable range (past the guard page, if one was requested).
pub fn alloc(
    ctx: &Arc<MmContext>,
    hint: Option<usize>,
    size: usize,
    mut prot: Protection,
    mut flags: VmaFlags,
    mut file: Option<FileBacking>,
) -> Result<usize> {
    if size == 0 {
        return Err(Status::InvalidArgument);
    }
    if flags.contains(VmaFlags::RESERVE) {
        file = None;
    }
    if flags.contains(VmaFlags::KERNEL_STACK) {
        flags |= VmaFlags::NON_PAGED | VmaFlags::GUARD_PAGE;
    }
    if file.is_some() {
        if flags.contains(VmaFlags::NON_PAGED) {
            return Err(Status::InvalidArgument);
        }
        // Page caches are built from small pages.
        flags -= VmaFlags::HUGE_PAGE;
    }
    if HUGE_PAGE_SIZE == FRAME_SIZE {
        flags -= VmaFlags::HUGE_PAGE;
    }

    let pgsize = if flags.contains(VmaFlags::HUGE_PAGE) {
        HUGE_PAGE_SIZE
    } else {
        FRAME_SIZE
    };
    if let Some(h) = hint {
        if h % pgsize != 0 {
            return Err(Status::InvalidArgument);
        }
    }

    let mut size = size;
    if let Some(fb) = &file {
        // Truncate the mapping to the file content that exists.
        if (size as u64) > fb.len {
            size = fb.len as usize;
        }
        if size == 0 {
            return Err(Status::InvalidArgument);
        }
        if !fb.writable && !flags.contains(VmaFlags::PRIVATE) {
            prot -= Protection::RW;
        }
    }
    size = size.next_multiple_of(pgsize);
    let guard_size = if flags.contains(VmaFlags::GUARD_PAGE) {
        pgsize
    } else {
        0
    };
    let total = size + guard_size;

    if !ctx.is_kernel() {
        prot |= Protection::USER;
    }
    if flags.contains(VmaFlags::HUGE_PAGE) {
        prot |= Protection::HUGE;
    }

    let window = window_for(ctx, flags);
    let mut inner = ctx.lock();

    let mut range_base = match hint {
        Some(h) => h.saturating_sub(guard_size),
        None => find_free_range(&inner, total, pgsize, window)?,
    };
    if !inner.range_free(range_base, total) {
        if flags.contains(VmaFlags::HINT) || hint.is_none() {
            range_base = find_free_range(&inner, total, pgsize, window)?;
        } else {
            return Err(Status::InUse);
        }
    }

    let user_base = range_base + guard_size;
    let region = file.as_ref().map(|fb| {
        Arc::new(MappedRegion {
            base: user_base,
            size,
            file_off: fb.offset,
            cache: fb.cache.clone(),
            ctx: Arc::downgrade(ctx),
            private: flags.contains(VmaFlags::PRIVATE),
            writable: fb.writable,
        })
    });

    let pageable = !flags.contains(VmaFlags::NON_PAGED) && !flags.contains(VmaFlags::RESERVE);
    let root = ctx.page_table_root();
    let mut built: usize = 0;

    let result = (|| -> Result<()> {
        if guard_size != 0 {
            let mut guard = PageDescriptor::new(range_base, Protection::empty());
            guard.state = PageState::GUARD | PageState::RESERVED;
            if flags.contains(VmaFlags::HUGE_PAGE) {
                guard.prot |= Protection::HUGE;
            }
            inner.stats.committed += guard.size();
            inner.pages.insert(range_base, guard);
            built += 1;
        }

        for vaddr in (user_base..user_base + size).step_by(pgsize) {
            let mut desc = PageDescriptor::new(vaddr, prot);
            desc.region = region.clone();
            if pageable {
                desc.state |= PageState::PAGEABLE;
                inner.stats.pageable += pgsize;
            } else if !flags.contains(VmaFlags::RESERVE) {
                inner.stats.non_paged += pgsize;
            }

            if flags.contains(VmaFlags::RESERVE) {
                desc.state |= PageState::RESERVED;
            } else if let (Some(fb), Some(region)) = (&file, &region) {
                let cache_off = fb.offset + (vaddr - user_base) as u64;
                if flags.intersects(VmaFlags::PREFAULT | VmaFlags::PRIVATE) {
                    let phys = fb.cache.frame_or_fill(cache_off)?;
                    desc.phys = phys;
                    desc.prot |= Protection::PRESENT;
                    // Writes must fault so dirtiness (shared) or the COW
                    // split (private) can be tracked; RW returns later.
                    desc.prot -= Protection::RW;
                    if region.private {
                        desc.state |= PageState::PRIVATE_COW;
                        fb.cache.register_copy(cache_off, ctx.id, vaddr);
                    }
                    desc.state |= PageState::TOUCHED;
                    // SAFETY: root belongs to this context; phys is a
                    // cache-owned frame.
                    unsafe { mmu::set_page_mapping(root, vaddr, phys, desc.prot)? };
                } else {
                    desc.state |= PageState::DEMAND;
                }
            } else {
                let pmm_flags = if flags.contains(VmaFlags::THIRTY_TWO_BIT) {
                    AllocFlags::BELOW_4G
                } else {
                    AllocFlags::empty()
                };
                let frames = pgsize / FRAME_SIZE;
                let range = pmm::allocate_pages(frames, frames, pmm_flags)?;
                super::zero_phys(range.base(), pgsize);
                desc.phys = range.base();
                desc.prot |= Protection::PRESENT;
                desc.state |= PageState::OWNS_FRAME | PageState::TOUCHED;
                // SAFETY: root belongs to this context; the frames were
                // just allocated for it.
                unsafe { mmu::set_page_mapping(root, vaddr, range.base(), desc.prot)? };
            }

            let resident = desc.prot.contains(Protection::PRESENT);
            inner.stats.committed += pgsize;
            inner.pages.insert(vaddr, desc);
            built += 1;
            if resident {
                inner.touch_working_set(vaddr);
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        // Unwind everything this call created.
        let mut vaddr = range_base;
        for _ in 0..built {
            if let Some(desc) = inner.pages.remove(&vaddr) {
                release_descriptor_storage(&mut inner, &desc, root);
                vaddr += desc.size();
            }
        }
        if let Some(region) = region {
            inner.regions.retain(|r| !Arc::ptr_eq(r, &region));
        }
        return Err(e);
    }

    if let Some(region) = region {
        region.cache.link_region(&region);
        inner.regions.push(region);
    }
    Ok(user_base)
}

/// Release the storage a descriptor holds, updating stats and the PTE but
/// not the page tree itself.
fn release_descriptor_storage(inner: &mut MmInner, desc: &PageDescriptor, root: u64) {
    let pgsize = desc.size();
    inner.drop_from_working_set(desc.vaddr);

    if desc.state.contains(PageState::GUARD) {
        inner.stats.committed -= pgsize;
        return;
    }

    if desc.state.contains(PageState::PAGEABLE) {
        inner.stats.pageable -= pgsize;
    } else if !desc.state.contains(PageState::RESERVED) {
        inner.stats.non_paged -= pgsize;
    }
    inner.stats.committed -= pgsize;

    if desc.state.contains(PageState::PAGED_OUT) {
        inner.stats.paged -= pgsize;
        super::swap::release_slot(desc.phys);
        return;
    }

    if let Some(region) = &desc.region {
        if let Some(off) = desc.cache_offset() {
            if region.private && desc.state.contains(PageState::PRIVATE_COW) {
                // Unsplit private copy: the frame is the cache's.
                region.cache.unregister_copy(off, desc.vaddr);
            }
        }
    }

    if desc.state.contains(PageState::OWNS_FRAME) && desc.phys != 0 {
        let _ = pmm::free_pages(FrameNumber::from_base(desc.phys), pgsize / FRAME_SIZE);
    }

    if desc.is_present() {
        // SAFETY: the root belongs to the context being mutated.
        let _ = unsafe { mmu::unset_page_mapping(root, desc.vaddr, true) };
    }
}

/// Free `[base, base + size)`. A guard page directly preceding `base` is
/// swept into the free.
pub fn free(ctx: &Arc<MmContext>, base: usize, size: usize) -> Result<()> {
    if size == 0 || base % FRAME_SIZE != 0 {
        return Err(Status::InvalidArgument);
    }
    let mut inner = ctx.lock();
    let root = ctx.page_table_root();

    // Validate the whole range first: every byte must be described.
    let mut cursor = base;
    let end = base + size.next_multiple_of(FRAME_SIZE);
    while cursor < end {
        let desc = inner.find(cursor).ok_or(Status::NotFound)?;
        if desc.vaddr > cursor {
            return Err(Status::NotFound);
        }
        cursor = desc.end();
    }

    // Sweep a guard page that fronts this allocation.
    let mut start = base;
    let guard_base = inner
        .pages
        .range(..base)
        .next_back()
        .filter(|(_, d)| d.end() == base && d.state.contains(PageState::GUARD))
        .map(|(&v, _)| v);
    if let Some(g) = guard_base {
        start = g;
    }

    let mut cursor = start;
    while cursor < end {
        let Some(desc) = inner.pages.remove(&cursor) else {
            break;
        };
        let next = desc.end();
        release_descriptor_storage(&mut inner, &desc, root);
        cursor = next;
    }

    // Regions with no remaining descriptor references die here.
    inner.regions.retain(|r| {
        if Arc::strong_count(r) > 1 {
            true
        } else {
            r.cache.unlink_region(r);
            false
        }
    });

    drop(inner);
    tlb::tlb_shootdown(root, start, end - start);
    Ok(())
}

/// Change protections (and optionally pageability) of a mapped range.
pub fn protect(
    ctx: &Arc<MmContext>,
    base: usize,
    size: usize,
    prot: Protection,
    pageable: Option<bool>,
) -> Result<()> {
    if size == 0 || base % FRAME_SIZE != 0 {
        return Err(Status::InvalidArgument);
    }
    let mut inner = ctx.lock();
    let root = ctx.page_table_root();
    let end = base + size.next_multiple_of(FRAME_SIZE);

    let mut cursor = base;
    while cursor < end {
        let desc = inner.find(cursor).ok_or(Status::NotFound)?;
        if desc.state.intersects(PageState::GUARD | PageState::RESERVED) {
            return Err(Status::InvalidOperation);
        }
        cursor = desc.end();
    }

    let is_user = !ctx.is_kernel();
    let mut cursor = base;
    while cursor < end {
        let (pgsize, remap, pageable_delta) = {
            let Some(desc) = inner.find_mut(cursor) else {
                break;
            };
            let pgsize = desc.size();
            let keep = desc.prot & (Protection::PRESENT | Protection::HUGE);
            desc.prot = prot | keep;
            if is_user {
                desc.prot |= Protection::USER;
            }
            let remap = desc
                .is_present()
                .then_some((desc.vaddr, desc.phys, desc.prot));
            let mut delta = 0isize;
            if let Some(p) = pageable {
                let was = desc.state.contains(PageState::PAGEABLE);
                if p && !was {
                    desc.state |= PageState::PAGEABLE;
                    delta = pgsize as isize;
                } else if !p && was {
                    desc.state -= PageState::PAGEABLE;
                    delta = -(pgsize as isize);
                }
            }
            (pgsize, remap, delta)
        };
        if let Some((vaddr, phys, new_prot)) = remap {
            // SAFETY: the root belongs to `ctx`; phys unchanged.
            unsafe { mmu::set_page_mapping(root, vaddr, phys, new_prot)? };
        }
        if pageable_delta > 0 {
            inner.stats.pageable += pageable_delta as usize;
            inner.stats.non_paged -= pageable_delta as usize;
        } else if pageable_delta < 0 {
            inner.stats.pageable -= (-pageable_delta) as usize;
            inner.stats.non_paged += (-pageable_delta) as usize;
        }
        cursor += pgsize;
    }

    drop(inner);
    tlb::tlb_shootdown(root, base, end - base);
    Ok(())
}
