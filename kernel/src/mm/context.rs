//! Address spaces
//!
//! An `MmContext` owns the ordered page tree, the architecture page-table
//! root, the working-set list and the per-space statistics, all guarded
//! by one IRQL-raising spinlock. Invariants: descriptors never overlap;
//! huge descriptors sit at huge-aligned addresses; a present descriptor
//! always has a live PTE and a paged-out one never does;
//! `stats.committed` equals the sum of descriptor sizes.

use alloc::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::page::{MappedRegion, PageDescriptor};
use crate::arch::mmu;
use crate::error::{Result, Status};
use crate::sync::spinlock::{SpinLock, SpinLockGuard};

/// Per-address-space statistics, in bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MmStats {
    /// Total bytes described by the page tree.
    pub committed: usize,
    /// Bytes currently evicted to swap.
    pub paged: usize,
    /// Bytes eligible for eviction.
    pub pageable: usize,
    /// Bytes pinned in RAM.
    pub non_paged: usize,
}

/// The lock-guarded interior of an address space.
pub struct MmInner {
    /// Page descriptors keyed by base virtual address.
    pub pages: BTreeMap<usize, PageDescriptor>,
    pub stats: MmStats,
    /// Virtual addresses in approximate use order; the eviction scan
    /// walks this. Membership mirrors `PageState::IN_WORKING_SET`.
    pub working_set: VecDeque<usize>,
    /// File mappings established in this space.
    pub regions: Vec<Arc<MappedRegion>>,
}

impl MmInner {
    /// Descriptor covering `addr`, if any. The BTreeMap range ending at
    /// `addr` finds the nearest lower neighbour; a huge page may still
    /// span the address.
    pub fn find(&self, addr: usize) -> Option<&PageDescriptor> {
        self.pages
            .range(..=addr)
            .next_back()
            .map(|(_, d)| d)
            .filter(|d| d.contains(addr))
    }

    pub fn find_mut(&mut self, addr: usize) -> Option<&mut PageDescriptor> {
        self.pages
            .range_mut(..=addr)
            .next_back()
            .map(|(_, d)| d)
            .filter(|d| d.contains(addr))
    }

    /// True if no descriptor intersects `[base, base + size)`.
    pub fn range_free(&self, base: usize, size: usize) -> bool {
        let end = match base.checked_add(size) {
            Some(e) => e,
            None => return false,
        };
        if let Some((_, d)) = self.pages.range(..base).next_back() {
            if d.end() > base {
                return false;
            }
        }
        self.pages.range(base..end).next().is_none()
    }

    pub fn touch_working_set(&mut self, vaddr: usize) {
        if let Some(desc) = self.pages.get_mut(&vaddr) {
            if !desc
                .state
                .contains(crate::mm::page::PageState::IN_WORKING_SET)
            {
                desc.state |= crate::mm::page::PageState::IN_WORKING_SET;
                self.working_set.push_back(vaddr);
            }
            desc.age = 0;
        }
    }

    pub fn drop_from_working_set(&mut self, vaddr: usize) {
        if let Some(pos) = self.working_set.iter().position(|&v| v == vaddr) {
            self.working_set.remove(pos);
        }
    }
}

static NEXT_CTX_ID: AtomicU64 = AtomicU64::new(1);

/// An address space: page tree + page-table root + statistics.
pub struct MmContext {
    pub id: u64,
    /// Pid of the owning process; 0 for the kernel context.
    owner_pid: AtomicU32,
    pt_root: AtomicU64,
    inner: SpinLock<MmInner>,
}

impl MmContext {
    pub fn new(owner_pid: u32) -> Result<Arc<MmContext>> {
        let root = mmu::allocate_page_table()?;
        Ok(Arc::new(MmContext {
            id: NEXT_CTX_ID.fetch_add(1, Ordering::Relaxed),
            owner_pid: AtomicU32::new(owner_pid),
            pt_root: AtomicU64::new(root),
            inner: SpinLock::new(MmInner {
                pages: BTreeMap::new(),
                stats: MmStats::default(),
                working_set: VecDeque::new(),
                regions: Vec::new(),
            }),
        }))
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid.load(Ordering::Relaxed)
    }

    pub fn set_owner_pid(&self, pid: u32) {
        self.owner_pid.store(pid, Ordering::Relaxed);
    }

    pub fn is_kernel(&self) -> bool {
        self.owner_pid() == 0
    }

    pub fn page_table_root(&self) -> u64 {
        self.pt_root.load(Ordering::Acquire)
    }

    /// Take the context lock. Fault handling and every tree mutation run
    /// under this.
    pub fn lock(&self) -> SpinLockGuard<'_, MmInner> {
        self.inner.lock()
    }

    pub fn stats(&self) -> MmStats {
        self.inner.lock().stats
    }
}

impl Drop for MmContext {
    fn drop(&mut self) {
        let root = self.pt_root.swap(0, Ordering::AcqRel);
        if root != 0 {
            let _ = mmu::free_user_tables(root);
        }
    }
}

lazy_static::lazy_static! {
    /// The kernel's own address space (owner pid 0).
    pub static ref KERNEL_CTX: Arc<MmContext> =
        MmContext::new(0).expect("kernel address space");
}

/// Check the structural invariants of a context; test and debug aid.
pub fn verify_invariants(ctx: &MmContext) -> Result<()> {
    let inner = ctx.lock();
    let mut committed = 0;
    let mut prev_end = 0usize;
    for (&vaddr, desc) in inner.pages.iter() {
        if vaddr != desc.vaddr || vaddr < prev_end {
            return Err(Status::Internal);
        }
        if desc.prot.contains(crate::mm::page::Protection::HUGE)
            && vaddr % crate::mm::HUGE_PAGE_SIZE != 0
        {
            return Err(Status::Internal);
        }
        committed += desc.size();
        prev_end = desc.end();
    }
    if committed != inner.stats.committed {
        return Err(Status::Internal);
    }
    Ok(())
}
