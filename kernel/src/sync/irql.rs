//! Interrupt request levels
//!
//! The running IRQL bounds which interrupt sources may fire on the current
//! CPU. Raising blocks everything at or below the new level; DISPATCH is
//! the level the scheduler ticks at, so code running at or above DISPATCH
//! cannot be preempted and must not block.
//!
//! Raising returns an [`IrqlGuard`] token; dropping it restores the
//! previous level. Lock guards that require a raised IRQL carry one of
//! these tokens so the discipline is enforced by ownership.

use core::sync::atomic::Ordering;

use crate::sched::cpu;

/// Interrupt request level. Values match the x86-64 TPR priority classes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Irql {
    /// Normal thread execution. Everything may interrupt.
    Passive = 0,
    /// Scheduler and DPC level. Device interrupts still fire.
    Dispatch = 2,
    /// Device interrupt level.
    Device = 13,
    /// Timer tick level.
    Clock = 14,
    /// All maskable interrupts blocked (TLB shootdown IPIs live here).
    High = 15,
}

impl Irql {
    pub fn from_raw(raw: u8) -> Irql {
        match raw {
            0 => Irql::Passive,
            2 => Irql::Dispatch,
            13 => Irql::Device,
            14 => Irql::Clock,
            _ => Irql::High,
        }
    }
}

/// Token proving the IRQL was raised; restores the prior level on drop.
///
/// Deliberately `!Send`: an IRQL belongs to the CPU that raised it.
#[derive(Debug)]
pub struct IrqlGuard {
    prev: u8,
    _not_send: core::marker::PhantomData<*const ()>,
}

/// Current IRQL of the executing CPU.
pub fn current() -> Irql {
    Irql::from_raw(cpu::current_cpu().irql.load(Ordering::Relaxed))
}

/// Raise the current CPU's IRQL to `to`.
///
/// Lowering through this function is a bug: `to` must be at or above the
/// current level.
pub fn raise(to: Irql) -> IrqlGuard {
    let cpu = cpu::current_cpu();
    let prev = cpu.irql.load(Ordering::Relaxed);
    debug_assert!(
        to as u8 >= prev,
        "IRQL raise to {:?} below current {}",
        to,
        prev
    );
    set_hw(to);
    cpu.irql.store(to as u8, Ordering::Relaxed);
    IrqlGuard {
        prev,
        _not_send: core::marker::PhantomData,
    }
}

/// Raise only if the current level is below `to`; otherwise a no-op guard.
pub fn raise_to_at_least(to: Irql) -> IrqlGuard {
    let cpu = cpu::current_cpu();
    let prev = cpu.irql.load(Ordering::Relaxed);
    if (to as u8) > prev {
        set_hw(to);
        cpu.irql.store(to as u8, Ordering::Relaxed);
    }
    IrqlGuard {
        prev,
        _not_send: core::marker::PhantomData,
    }
}

impl Drop for IrqlGuard {
    fn drop(&mut self) {
        let cpu = cpu::current_cpu();
        cpu.irql.store(self.prev, Ordering::Relaxed);
        set_hw(Irql::from_raw(self.prev));
    }
}

/// Program the hardware mask for the new level.
///
/// On bare metal everything at or above DISPATCH runs with interrupts
/// masked; finer-grained masking is the local APIC TPR's job once it is
/// programmed. On the host there is no hardware to program.
#[cfg(target_os = "none")]
fn set_hw(to: Irql) {
    if to >= Irql::Dispatch {
        x86_64::instructions::interrupts::disable();
    } else {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(not(target_os = "none"))]
fn set_hw(_to: Irql) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_and_restore() {
        assert_eq!(current(), Irql::Passive);
        {
            let _g = raise(Irql::Dispatch);
            assert_eq!(current(), Irql::Dispatch);
            {
                let _g2 = raise(Irql::High);
                assert_eq!(current(), Irql::High);
            }
            assert_eq!(current(), Irql::Dispatch);
        }
        assert_eq!(current(), Irql::Passive);
    }

    #[test]
    fn raise_to_at_least_is_idempotent_above() {
        let _g = raise(Irql::Device);
        let g2 = raise_to_at_least(Irql::Dispatch);
        assert_eq!(current(), Irql::Device);
        drop(g2);
        assert_eq!(current(), Irql::Device);
    }
}
