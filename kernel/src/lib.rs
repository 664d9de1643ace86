//! Onyx kernel library
//!
//! Monolithic x86-64 kernel core: virtual memory, driver-mediated VFS
//! with asynchronous IRPs, IRQL-disciplined scheduling primitives, an
//! IPv4/UDP/TCP stack with POSIX-style sockets, and the syscall
//! boundary.
//!
//! The crate builds for bare metal (`target_os = "none"`) and for the
//! host, where the std test harness runs the full logic against a
//! simulated physical-memory arena.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// On bare metal the kernel heap is a linked-list allocator seeded from
// a bootstrap region (see mm::heap). On the host, delegate to the
// system allocator so test code using Vec/String runs unmodified.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod arch;
pub mod driver;
pub mod error;
pub mod fs;
pub mod logger;
pub mod mm;
pub mod net;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod integration_tests;

#[cfg(test)]
pub mod test_support;

use crate::error::Result;

/// Kernel bring-up after memory is initialized. Order matters: logging,
/// then the VFS (which registers the boot ramfs and mounts root), then
/// the network core. No singleton initializes lazily after this
/// returns.
pub fn init_core() -> Result<()> {
    logger::init();
    fs::init()?;
    net::init();
    log::info!("onyx core initialized");
    Ok(())
}
