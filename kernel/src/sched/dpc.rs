//! Deferred procedure calls
//!
//! A DPC is a callback queued to a specific CPU and executed at DISPATCH
//! before the scheduler selects a new thread. IRQ handlers use DPCs to
//! push work that needs to allocate or signal out of the interrupt path.
//! DPCs cannot be cancelled once queued.

use super::cpu::Cpu;
use crate::sync::irql::{self, Irql};

pub struct Dpc {
    pub func: fn(usize),
    pub arg: usize,
}

impl Dpc {
    pub fn new(func: fn(usize), arg: usize) -> Self {
        Self { func, arg }
    }
}

/// Queue a DPC on the given CPU.
pub fn queue_on(cpu: &'static Cpu, dpc: Dpc) {
    cpu.dpcs.lock().push_back(dpc);
}

/// Queue a DPC on the executing CPU.
pub fn queue(dpc: Dpc) {
    queue_on(super::cpu::current_cpu(), dpc);
}

/// Run every pending DPC on `cpu` at DISPATCH level.
pub fn drain(cpu: &'static Cpu) {
    let _dispatch = irql::raise_to_at_least(Irql::Dispatch);
    loop {
        let next = cpu.dpcs.lock().pop_front();
        match next {
            Some(dpc) => (dpc.func)(dpc.arg),
            None => break,
        }
    }
}
