//! Per-CPU state
//!
//! Every CPU owns its IRQL, its run queues, its DPC queue and the pointer
//! to the thread it is executing. `current_cpu()` is the O(1) per-CPU
//! accessor the architecture contract requires.
//!
//! On the host build each OS thread models one CPU: the first access from
//! a thread registers a fresh CPU object, which keeps parallel tests
//! isolated while still letting the TLB shootdown protocol enumerate
//! every live CPU.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::RwLock;

use super::dpc::Dpc;
use super::queue::RunQueues;
use super::thread::Thread;
use crate::sync::spinlock::SpinLock;

pub struct Cpu {
    id: u32,
    /// Current interrupt request level (see [`crate::sync::irql`]).
    pub irql: AtomicU8,
    current: RwLock<Option<Arc<Thread>>>,
    pub queues: SpinLock<RunQueues>,
    pub dpcs: SpinLock<VecDeque<Dpc>>,
    /// Bumped once per TLB shootdown this CPU has processed.
    pub tlb_generation: AtomicU64,
    /// Sequence number of the last shootdown packet drained.
    pub tlb_seen: AtomicU64,
    /// Ticks observed; drives boost decay.
    pub ticks: AtomicU64,
}

impl Cpu {
    fn new(id: u32) -> Self {
        Self {
            id,
            irql: AtomicU8::new(0),
            current: RwLock::new(None),
            queues: SpinLock::new(RunQueues::new()),
            dpcs: SpinLock::new(VecDeque::new()),
            tlb_generation: AtomicU64::new(0),
            tlb_seen: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current.read().clone()
    }

    pub fn set_current(&self, thr: Option<Arc<Thread>>) {
        *self.current.write() = thr;
    }

    pub fn take_current(&self) -> Option<Arc<Thread>> {
        self.current.write().take()
    }
}

static NEXT_CPU_ID: AtomicU32 = AtomicU32::new(0);

lazy_static::lazy_static! {
    /// All CPUs that have come online, in registration order.
    static ref CPUS: spin::Mutex<Vec<&'static Cpu>> = spin::Mutex::new(Vec::new());
}

fn register_cpu() -> &'static Cpu {
    let id = NEXT_CPU_ID.fetch_add(1, Ordering::Relaxed);
    let cpu: &'static Cpu = alloc::boxed::Box::leak(alloc::boxed::Box::new(Cpu::new(id)));
    CPUS.lock().push(cpu);
    cpu
}

/// Snapshot of every online CPU.
pub fn all_cpus() -> Vec<&'static Cpu> {
    CPUS.lock().clone()
}

pub fn cpu_by_id(id: u32) -> Option<&'static Cpu> {
    CPUS.lock().iter().copied().find(|c| c.id == id)
}

#[cfg(target_os = "none")]
mod imp {
    use super::*;

    // Single-pointer bootstrap: the BSP registers itself at kmain; AP
    // bringup repeats this per core with its own GS base.
    static BSP: spin::Once<&'static Cpu> = spin::Once::new();

    pub fn current_cpu() -> &'static Cpu {
        BSP.call_once(super::register_cpu)
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use super::*;

    std::thread_local! {
        static CPU_SLOT: &'static Cpu = super::register_cpu();
    }

    pub fn current_cpu() -> &'static Cpu {
        CPU_SLOT.with(|c| *c)
    }
}

/// The executing CPU's state block, reachable in O(1) from any context.
pub fn current_cpu() -> &'static Cpu {
    imp::current_cpu()
}
