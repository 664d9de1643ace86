//! Legacy interrupt controller bring-up (bare metal)
//!
//! Remaps the 8259 pair clear of the exception range and provides vector
//! allocation for drivers. The IDT itself is installed by the boot path;
//! handlers dispatch into the IRQ layer which defers real work through
//! DPCs.

use core::sync::atomic::{AtomicU8, Ordering};

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    // SAFETY: the offsets avoid the CPU exception vectors.
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

static NEXT_VECTOR: AtomicU8 = AtomicU8::new(PIC_2_OFFSET + 8);

pub fn init() {
    // SAFETY: single call during boot, interrupts still masked.
    unsafe { PICS.lock().initialize() };
}

/// Hand out a free IDT vector above the legacy IRQ range.
pub fn allocate_vector() -> Option<u8> {
    let v = NEXT_VECTOR.fetch_add(1, Ordering::Relaxed);
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

pub fn end_of_interrupt(vector: u8) {
    // SAFETY: called from the handler for `vector` only.
    unsafe { PICS.lock().notify_end_of_interrupt(vector) };
}
