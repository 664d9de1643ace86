//! Page-out and the swap backing store
//!
//! Pages whose descriptors carry PAGEABLE may be evicted under memory
//! pressure. Anonymous (frame-owning) pages go to the swap backend and
//! store their slot id in the descriptor's physical field with SWAP_PHYS
//! set; clean file-backed pages simply drop back to demand state — the
//! page cache still holds their contents. Kernel stacks, NON_PAGED
//! allocations and guard pages are never touched.

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use super::context::MmContext;
use super::page::{PageState, Protection};
use super::FRAME_SIZE;
use crate::arch::{mmu, tlb};
use crate::error::{Result, Status};
use crate::mm::pmm::{self, FrameNumber};

/// A swap backing store. Slot ids are backend-assigned and opaque.
pub trait SwapBackend: Send + Sync {
    fn store(&self, data: &[u8]) -> Result<u64>;
    fn load(&self, slot: u64, buf: &mut [u8]) -> Result<()>;
    fn release(&self, slot: u64);
}

/// Reference backend keeping slots in kernel heap; the default until a
/// block-device backend registers.
pub struct MemSwapBackend {
    slots: spin::Mutex<BTreeMap<u64, Box<[u8]>>>,
    next: AtomicU64,
}

impl MemSwapBackend {
    pub fn new() -> Self {
        Self {
            slots: spin::Mutex::new(BTreeMap::new()),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for MemSwapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapBackend for MemSwapBackend {
    fn store(&self, data: &[u8]) -> Result<u64> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().insert(slot, data.into());
        Ok(slot)
    }

    fn load(&self, slot: u64, buf: &mut [u8]) -> Result<()> {
        let slots = self.slots.lock();
        let data = slots.get(&slot).ok_or(Status::NotFound)?;
        if data.len() != buf.len() {
            return Err(Status::InvalidArgument);
        }
        buf.copy_from_slice(data);
        Ok(())
    }

    fn release(&self, slot: u64) {
        self.slots.lock().remove(&slot);
    }
}

lazy_static::lazy_static! {
    static ref BACKEND: spin::RwLock<Arc<dyn SwapBackend>> =
        spin::RwLock::new(Arc::new(MemSwapBackend::new()));
}

pub fn set_backend(backend: Arc<dyn SwapBackend>) {
    *BACKEND.write() = backend;
}

pub fn load_slot(slot: u64, buf: &mut [u8]) -> Result<()> {
    BACKEND.read().load(slot, buf)
}

pub fn release_slot(slot: u64) {
    BACKEND.read().release(slot);
}

/// Evict one page of `ctx` at `vaddr`. The caller picked the victim.
pub fn page_out(ctx: &Arc<MmContext>, vaddr: usize) -> Result<()> {
    let root = ctx.page_table_root();
    let mut inner = ctx.lock();

    let evicted = {
        let desc = inner.find_mut(vaddr).ok_or(Status::NotFound)?;
        if !desc.state.contains(PageState::PAGEABLE) || !desc.is_present() {
            return Err(Status::InvalidOperation);
        }
        let pgsize = desc.size();
        let vbase = desc.vaddr;

        if desc.state.contains(PageState::OWNS_FRAME) {
            // Anonymous contents exist nowhere else: write to swap.
            let mut buf = alloc::vec![0u8; pgsize];
            super::read_phys(desc.phys, &mut buf);
            let slot = BACKEND.read().store(&buf)?;
            let _ = pmm::free_pages(FrameNumber::from_base(desc.phys), pgsize / FRAME_SIZE);
            desc.phys = slot;
            desc.prot -= Protection::PRESENT;
            desc.state -= PageState::OWNS_FRAME;
            desc.state |= PageState::PAGED_OUT | PageState::SWAP_PHYS;
            (vbase, pgsize, true)
        } else if desc.region.is_some() && !desc.state.contains(PageState::PRIVATE_COW) {
            // Cache-backed: the frame stays with the cache; refill is a
            // demand fault. A dirty shared page was already marked in
            // the cache by the promotion fault, so dropping the mapping
            // loses nothing. Unsplit private copies stay resident: their
            // membership in the master's copy list pins them.
            desc.phys = 0;
            desc.prot -= Protection::PRESENT;
            desc.state |= PageState::DEMAND;
            (vbase, pgsize, false)
        } else {
            return Err(Status::InvalidOperation);
        }
    };

    let (vbase, pgsize, to_swap) = evicted;
    inner.drop_from_working_set(vbase);
    if let Some(desc) = inner.pages.get_mut(&vbase) {
        desc.state -= PageState::IN_WORKING_SET;
    }
    if to_swap {
        inner.stats.paged += pgsize;
    }
    // SAFETY: root belongs to `ctx`.
    unsafe { mmu::unset_page_mapping(root, vbase, false)? };
    drop(inner);
    tlb::tlb_shootdown(root, vbase, pgsize);
    Ok(())
}

/// Evict least-recently-used pageable pages until `goal` bytes are
/// reclaimed or the working set runs dry. Returns bytes reclaimed.
pub fn evict(ctx: &Arc<MmContext>, goal: usize) -> usize {
    let mut reclaimed = 0;
    while reclaimed < goal {
        let victim = {
            let mut inner = ctx.lock();
            // Age the set and take the oldest resident pageable page.
            let candidates: Vec<usize> = inner.working_set.iter().copied().collect();
            let mut victim = None;
            for vaddr in candidates {
                if let Some(desc) = inner.pages.get_mut(&vaddr) {
                    if desc.state.contains(PageState::PAGEABLE) && desc.is_present() {
                        desc.age = desc.age.saturating_add(1);
                        if victim.is_none() {
                            victim = Some(vaddr);
                        }
                    }
                }
            }
            victim
        };
        let Some(vaddr) = victim else { break };
        match page_out(ctx, vaddr) {
            Ok(()) => reclaimed += FRAME_SIZE,
            Err(_) => break,
        }
    }
    reclaimed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_backend_round_trip() {
        let backend = MemSwapBackend::new();
        let slot = backend.store(&[7u8; 64]).unwrap();
        let mut buf = [0u8; 64];
        backend.load(slot, &mut buf).unwrap();
        assert_eq!(buf, [7u8; 64]);
        backend.release(slot);
        assert!(backend.load(slot, &mut buf).is_err());
    }
}
