//! Onyx kernel binary (bare-metal entry)

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use bootloader_api::{entry_point, BootInfo};
    use onyx_kernel::{arch, mm, sched};

    entry_point!(kernel_main);

    fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        mm::init_from_boot_info(boot_info);
        arch::x86_64::interrupts::init();
        if let Err(status) = onyx_kernel::init_core() {
            panic!("core init failed: {}", status);
        }
        // The boot CPU becomes the scheduler's first idle loop.
        loop {
            sched::reschedule();
            arch::x86_64::halt();
        }
    }

    /// Fatal path: log state, stop every CPU, halt.
    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        log::error!("kernel panic: {}", info);
        arch::x86_64::halt_all();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    // The kernel binary is bare-metal only; host builds use the library
    // and its test harness.
}
