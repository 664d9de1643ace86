//! NIC attachment and the receive dispatch thread
//!
//! A network card registers as a v-device; `attach_nic` wires it to an
//! interface whose transmit path submits write IRPs against the NIC
//! vnode, and spawns the per-interface dispatch thread: a REAL_TIME
//! kernel thread that pulls frames with read IRPs and pushes them
//! through `process_frame`. The software loopback needs none of this —
//! its transmit reflects synchronously (see `Interface::transmit`).

use alloc::sync::Arc;

use super::{Interface, MacAddress, NicTransmit};
use crate::driver::irp::{self, Irp, IrpBuffer, IrpOp};
use crate::driver::registry::Vdev;
use crate::error::Result;

/// Largest frame the dispatch thread will pull in one IRP.
const MAX_FRAME: usize = 1518;

struct NicTx {
    vdev: Arc<Vdev>,
}

impl NicTransmit for NicTx {
    fn transmit(&self, frame: &[u8]) -> Result<()> {
        let irp = Irp::new(
            None,
            self.vdev.desc,
            IrpOp::Write,
            0,
            frame.len(),
            IrpBuffer::for_write(frame.to_vec()),
        );
        irp::run(&*self.vdev.driver.ops, &irp).map(|_| ())
    }
}

/// Register a NIC-backed interface and start its dispatch thread.
pub fn attach_nic(name: &str, mac: MacAddress, vdev: Arc<Vdev>) -> Arc<Interface> {
    let iface = super::register_interface(
        name,
        mac,
        Some(Arc::new(NicTx { vdev: vdev.clone() })),
        false,
    );
    spawn_dispatch(iface.clone(), vdev);
    iface
}

/// One receive round: pull a frame via IRP and dispatch it. The
/// dispatch thread loops on this; tests drive it directly.
pub fn rx_round(iface: &Arc<Interface>, vdev: &Arc<Vdev>) -> Result<()> {
    let irp = Irp::new(
        None,
        vdev.desc,
        IrpOp::Read,
        0,
        MAX_FRAME,
        IrpBuffer::for_read(MAX_FRAME),
    );
    let n = irp::run(&*vdev.driver.ops, &irp)?;
    if n > 0 {
        let frame = irp.buffer.take_read();
        super::process_frame(iface, &frame[..n.min(frame.len())]);
    }
    Ok(())
}

#[cfg(target_os = "none")]
fn spawn_dispatch(iface: Arc<Interface>, vdev: Arc<Vdev>) {
    use crate::sched::queue::Priority;
    use crate::sched::thread::{self, Thread};

    // One dispatch thread per NIC at REAL_TIME, matching the latency
    // budget of the receive path.
    let name = iface.name.clone();
    let thread = Thread::allocate();
    let arg = alloc::boxed::Box::new((iface, vdev));
    let arg_ptr = alloc::boxed::Box::into_raw(arg) as usize;

    extern "C" fn dispatch_entry(arg: usize) -> ! {
        // SAFETY: the pointer was leaked by spawn_dispatch just above
        // and is owned by this thread from here on.
        let (iface, vdev) =
            *unsafe { alloc::boxed::Box::from_raw(arg as *mut (Arc<Interface>, Arc<Vdev>)) };
        loop {
            if rx_round(&iface, &vdev).is_err() {
                crate::sched::yield_now();
            }
        }
    }

    let mut ctx = crate::arch::context::ThreadContext::empty();
    let stack = match crate::mm::vmm::alloc(
        &crate::mm::context::KERNEL_CTX,
        None,
        64 * 1024,
        crate::mm::page::Protection::RW,
        crate::mm::vmm::VmaFlags::KERNEL_STACK,
        None,
    ) {
        Ok(base) => base,
        Err(status) => {
            log::error!("no stack for {} dispatch thread: {}", name, status);
            // SAFETY: reclaim the leaked argument; the thread never ran.
            drop(unsafe {
                alloc::boxed::Box::from_raw(arg_ptr as *mut (Arc<Interface>, Arc<Vdev>))
            });
            return;
        }
    };
    crate::arch::context::setup_thread_context(
        &mut ctx,
        dispatch_entry as usize,
        arg_ptr,
        false,
        stack,
        64 * 1024,
        crate::mm::context::KERNEL_CTX.page_table_root(),
    );
    if thread.initialize(Priority::RealTime, !0, ctx).is_ok() {
        thread::ready(&thread);
    }
}

#[cfg(not(target_os = "none"))]
fn spawn_dispatch(_iface: Arc<Interface>, _vdev: Arc<Vdev>) {
    // Host tests call rx_round explicitly.
}
