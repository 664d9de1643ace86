//! x86-64 support

pub mod context;
pub mod mmu;
pub mod tlb;

#[cfg(target_os = "none")]
pub mod interrupts;

/// Halt the CPU until the next interrupt.
#[cfg(target_os = "none")]
pub fn halt() {
    x86_64::instructions::hlt();
}

/// Stop all other CPUs and halt forever; the terminal half of the panic
/// path. NMIs are the transport so even a CPU spinning at HIGH stops.
#[cfg(target_os = "none")]
pub fn halt_all() -> ! {
    x86_64::instructions::interrupts::disable();
    // NMI broadcast goes through the local APIC ICR once the APIC is up;
    // with only the BSP online there is nobody else to stop.
    loop {
        x86_64::instructions::hlt();
    }
}
