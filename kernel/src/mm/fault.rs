//! Page fault resolution
//!
//! Entered from the arch trap handler with the faulting context and
//! address. Resolves demand-zero and file-backed fills, private COW
//! splits, shared-mapping write promotion (dirty tracking), and swap-in.
//! Runs with the context lock held throughout.

use alloc::sync::Arc;

use super::context::MmContext;
use super::page::{PageState, Protection};
use super::{swap, FRAME_SIZE};
use crate::arch::{mmu, tlb};
use crate::error::{Result, Status};
use crate::mm::pmm::{self, AllocFlags};

bitflags::bitflags! {
    /// What the trap reported about the access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultReason: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        /// Access originated in user mode.
        const USER = 1 << 3;
        /// The translation was present (protection violation).
        const PRESENT = 1 << 4;
    }
}

/// Resolve a fault at `addr`. `Ok(())` means the access can be retried;
/// any error is a real violation for the caller to turn into a signal or
/// a kernel panic.
pub fn fault(ctx: &Arc<MmContext>, addr: usize, reason: FaultReason) -> Result<()> {
    let root = ctx.page_table_root();
    let mut inner = ctx.lock();

    let Some(desc) = inner.find_mut(addr) else {
        return Err(Status::PageFault);
    };

    if desc.state.contains(PageState::GUARD) {
        return Err(Status::AccessDenied);
    }
    if desc.state.contains(PageState::RESERVED) {
        return Err(Status::AccessDenied);
    }
    if reason.contains(FaultReason::USER) && !desc.prot.contains(Protection::USER) {
        return Err(Status::AccessDenied);
    }
    if reason.contains(FaultReason::EXEC) && !desc.prot.contains(Protection::EXEC) {
        return Err(Status::AccessDenied);
    }

    let vaddr = desc.vaddr;
    let pgsize = desc.size();

    if desc.is_present() {
        if !reason.contains(FaultReason::WRITE) || desc.prot.contains(Protection::RW) {
            // Spurious (stale TLB on another CPU, or a race that already
            // resolved); nothing to do.
            return Ok(());
        }

        if desc.state.contains(PageState::PRIVATE_COW) {
            // Split: fresh frame, copy the cache contents, unlink from
            // the master's copy list.
            let cache_off = desc.cache_offset().ok_or(Status::Internal)?;
            let region = desc.region.clone().ok_or(Status::Internal)?;
            let range = pmm::allocate_pages(pgsize / FRAME_SIZE, 1, AllocFlags::empty())?;
            // SAFETY: both sides are direct-mapped frames; the source is
            // the cache frame this descriptor currently points at.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    super::phys_to_virt(desc.phys),
                    super::phys_to_virt(range.base()),
                    pgsize,
                );
            }
            desc.phys = range.base();
            desc.prot |= Protection::RW;
            desc.state -= PageState::PRIVATE_COW;
            desc.state |= PageState::OWNS_FRAME | PageState::DIRTY;
            let new_prot = desc.prot;
            region.cache.unregister_copy(cache_off, vaddr);
            // SAFETY: root belongs to `ctx`; the frame was just allocated.
            unsafe { mmu::set_page_mapping(root, vaddr, range.base(), new_prot)? };
            inner.touch_working_set(vaddr);
            drop(inner);
            tlb::tlb_shootdown(root, vaddr, pgsize);
            return Ok(());
        }

        if let Some(region) = desc.region.clone() {
            if !region.private && region.writable {
                // Shared mapping write promotion: re-grant RW and mark
                // the cache frame dirty.
                let cache_off = desc.cache_offset().ok_or(Status::Internal)?;
                desc.prot |= Protection::RW;
                desc.state |= PageState::DIRTY;
                let (phys, new_prot) = (desc.phys, desc.prot);
                region.cache.mark_dirty(cache_off);
                // SAFETY: root belongs to `ctx`; phys unchanged.
                unsafe { mmu::set_page_mapping(root, vaddr, phys, new_prot)? };
                drop(inner);
                tlb::tlb_shootdown(root, vaddr, pgsize);
                return Ok(());
            }
        }
        return Err(Status::AccessDenied);
    }

    // Not present: bring the page in.
    if desc.state.contains(PageState::PAGED_OUT) {
        let slot = desc.phys;
        let range = pmm::allocate_pages(pgsize / FRAME_SIZE, 1, AllocFlags::empty())?;
        let mut buf = alloc::vec![0u8; pgsize];
        swap::load_slot(slot, &mut buf)?;
        super::write_phys(range.base(), &buf);
        swap::release_slot(slot);
        desc.phys = range.base();
        desc.prot |= Protection::PRESENT;
        desc.state -= PageState::PAGED_OUT | PageState::SWAP_PHYS;
        desc.state |= PageState::OWNS_FRAME | PageState::TOUCHED;
        let new_prot = desc.prot;
        // SAFETY: root belongs to `ctx`; fresh frame.
        unsafe { mmu::set_page_mapping(root, vaddr, range.base(), new_prot)? };
        inner.stats.paged -= pgsize;
        inner.touch_working_set(vaddr);
        return Ok(());
    }

    if desc.state.contains(PageState::DEMAND) {
        if let Some(region) = desc.region.clone() {
            // File-backed fill through the mount's page cache.
            let cache_off = desc.cache_offset().ok_or(Status::Internal)?;
            let phys = region.cache.frame_or_fill(cache_off)?;
            desc.phys = phys;
            desc.prot |= Protection::PRESENT;
            // Writes keep faulting until promoted, so dirtiness is seen.
            desc.prot -= Protection::RW;
            desc.state -= PageState::DEMAND;
            desc.state |= PageState::TOUCHED;
            let new_prot = desc.prot;
            // SAFETY: root belongs to `ctx`; cache-owned frame.
            unsafe { mmu::set_page_mapping(root, vaddr, phys, new_prot)? };
        } else {
            // Demand-zero anonymous page.
            let range = pmm::allocate_pages(pgsize / FRAME_SIZE, 1, AllocFlags::empty())?;
            super::zero_phys(range.base(), pgsize);
            desc.phys = range.base();
            desc.prot |= Protection::PRESENT;
            desc.state -= PageState::DEMAND;
            desc.state |= PageState::OWNS_FRAME | PageState::TOUCHED;
            let new_prot = desc.prot;
            // SAFETY: root belongs to `ctx`; fresh frame.
            unsafe { mmu::set_page_mapping(root, vaddr, range.base(), new_prot)? };
        }
        inner.touch_working_set(vaddr);
        // A write fault on a freshly filled shared file page still needs
        // the promotion pass; resolve it in the same trap.
        if reason.contains(FaultReason::WRITE) {
            drop(inner);
            return fault(ctx, addr, reason | FaultReason::PRESENT);
        }
        return Ok(());
    }

    Err(Status::PageFault)
}
