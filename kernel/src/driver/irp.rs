//! I/O request packets
//!
//! An IRP carries one read or write against a vnode/descriptor through a
//! driver. Lifecycle: the submitter fills the request and calls the
//! driver's `submit_irp`. A driver either completes synchronously
//! (leaves the IRP unarmed) or arms it with a completion event plus an
//! on-event-set callback; the submitter then waits, invokes the
//! callback, and loops while the callback asks for IRP_RETRY (partial
//! delivery). `finalize_irp` runs exactly once afterwards. An optional
//! detach event races the completion event — device removal aborts
//! outstanding waits. The packet and its buffer are shared-ownership for
//! the whole submit→finalize window.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{Result, Status};
use crate::fs::vnode::Vnode;
use crate::net::ip::SocketAddrV4;
use crate::sync::event::Event;
use crate::sync::wait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrpOp {
    Read,
    Write,
}

/// Shared-ownership data buffer of an IRP.
#[derive(Clone)]
pub enum IrpBuffer {
    /// Driver fills this on reads.
    Read(Arc<spin::Mutex<Vec<u8>>>),
    /// Driver consumes this on writes.
    Write(Arc<Vec<u8>>),
    None,
}

impl IrpBuffer {
    pub fn for_read(len: usize) -> Self {
        IrpBuffer::Read(Arc::new(spin::Mutex::new(alloc::vec![0u8; len])))
    }

    pub fn for_write(data: Vec<u8>) -> Self {
        IrpBuffer::Write(Arc::new(data))
    }

    pub fn len(&self) -> usize {
        match self {
            IrpBuffer::Read(b) => b.lock().len(),
            IrpBuffer::Write(b) => b.len(),
            IrpBuffer::None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the bytes out of a read buffer after completion.
    pub fn take_read(&self) -> Vec<u8> {
        match self {
            IrpBuffer::Read(b) => core::mem::take(&mut *b.lock()),
            _ => Vec::new(),
        }
    }
}

/// Socket-plane request data carried by socket IRPs.
pub struct SocketData {
    pub flags: u32,
    pub addr: Option<SocketAddrV4>,
    pub addr_len: usize,
}

type IrpCallback = Box<dyn FnMut(&Arc<Irp>) -> Result<()> + Send>;

pub struct Irp {
    pub vn: Option<Arc<Vnode>>,
    /// Driver descriptor the operation targets.
    pub desc: u64,
    pub op: IrpOp,
    /// Offset and count in the target's logical blocks.
    pub blk_offset: u64,
    pub blk_count: usize,
    pub buffer: IrpBuffer,
    /// Poll-only probe: report readiness, transfer nothing.
    pub dry: bool,
    status: spin::Mutex<Result<()>>,
    transferred: AtomicUsize,
    evnt: spin::Mutex<Option<Arc<Event>>>,
    on_event_set: spin::Mutex<Option<IrpCallback>>,
    detach: spin::Mutex<Option<Arc<Event>>>,
    finalized: AtomicBool,
    /// Driver-private companion data for multi-wait protocols.
    drv_data: spin::Mutex<Option<Box<dyn core::any::Any + Send>>>,
    pub socket: spin::Mutex<Option<SocketData>>,
}

impl Irp {
    fn build(
        vn: Option<Arc<Vnode>>,
        desc: u64,
        op: IrpOp,
        blk_offset: u64,
        blk_count: usize,
        buffer: IrpBuffer,
        dry: bool,
    ) -> Arc<Irp> {
        Arc::new(Irp {
            vn,
            desc,
            op,
            blk_offset,
            blk_count,
            buffer,
            dry,
            status: spin::Mutex::new(Ok(())),
            transferred: AtomicUsize::new(0),
            evnt: spin::Mutex::new(None),
            on_event_set: spin::Mutex::new(None),
            detach: spin::Mutex::new(None),
            finalized: AtomicBool::new(false),
            drv_data: spin::Mutex::new(None),
            socket: spin::Mutex::new(None),
        })
    }

    pub fn new(
        vn: Option<Arc<Vnode>>,
        desc: u64,
        op: IrpOp,
        blk_offset: u64,
        blk_count: usize,
        buffer: IrpBuffer,
    ) -> Arc<Irp> {
        Self::build(vn, desc, op, blk_offset, blk_count, buffer, false)
    }

    /// Poll-only probe: the driver reports readiness without moving data.
    pub fn new_dry(
        vn: Option<Arc<Vnode>>,
        desc: u64,
        blk_offset: u64,
        blk_count: usize,
    ) -> Arc<Irp> {
        Self::build(vn, desc, IrpOp::Read, blk_offset, blk_count, IrpBuffer::None, true)
    }

    /// Driver side: arm the IRP for asynchronous completion. Both the
    /// event and the callback must be set together.
    pub fn arm(&self, event: Arc<Event>, callback: IrpCallback) {
        *self.evnt.lock() = Some(event);
        *self.on_event_set.lock() = Some(callback);
    }

    /// Submitter side: attach a cancellation event that aborts the wait
    /// when it fires first (device removal).
    pub fn set_detach_event(&self, event: Arc<Event>) {
        *self.detach.lock() = Some(event);
    }

    pub fn set_status(&self, status: Result<()>) {
        *self.status.lock() = status;
    }

    pub fn status(&self) -> Result<()> {
        *self.status.lock()
    }

    pub fn set_transferred(&self, n: usize) {
        self.transferred.store(n, Ordering::Release);
    }

    pub fn add_transferred(&self, n: usize) {
        self.transferred.fetch_add(n, Ordering::AcqRel);
    }

    pub fn transferred(&self) -> usize {
        self.transferred.load(Ordering::Acquire)
    }

    pub fn completion_event(&self) -> Option<Arc<Event>> {
        self.evnt.lock().clone()
    }

    pub fn set_driver_data(&self, data: Box<dyn core::any::Any + Send>) {
        *self.drv_data.lock() = Some(data);
    }

    pub fn take_driver_data(&self) -> Option<Box<dyn core::any::Any + Send>> {
        self.drv_data.lock().take()
    }
}

/// Drive an IRP through its full lifecycle against `ops`; returns bytes
/// (or blocks, for block devices) transferred.
///
/// The wait/callback loop masks IRP_RETRY from the caller; the detach
/// event aborts with ABORTED. `finalize_irp` runs exactly once on every
/// path out.
pub fn run(ops: &dyn super::DriverOps, irp: &Arc<Irp>) -> Result<usize> {
    let submit_result = ops.submit_irp(irp);

    if submit_result.is_ok() {
        loop {
            let event = irp.evnt.lock().clone();
            let Some(event) = event else {
                break; // synchronous completion during submit
            };
            let detach = irp.detach.lock().clone();
            let waited = match &detach {
                Some(d) => wait::wait_on_many(&[event.header(), d.header()]),
                None => wait::wait_on(event.header()).map(|()| 0),
            };
            match waited {
                Ok(0) => {}
                Ok(_) => {
                    // Detach fired first: device went away mid-request.
                    irp.set_status(Err(Status::Aborted));
                    break;
                }
                Err(e) => {
                    irp.set_status(Err(e));
                    break;
                }
            }

            // Consume the signal before the callback runs: a retrying
            // driver re-sets the event from inside it.
            event.clear();
            let mut callback = irp.on_event_set.lock().take();
            match &mut callback {
                Some(cb) => match cb(irp) {
                    Err(Status::IrpRetry) => {
                        // Partial delivery: wait for the re-armed event
                        // with the same callback.
                        *irp.on_event_set.lock() = callback;
                        continue;
                    }
                    other => {
                        irp.set_status(other);
                        break;
                    }
                },
                None => break,
            }
        }
    } else {
        irp.set_status(submit_result);
    }

    if !irp.finalized.swap(true, Ordering::AcqRel) {
        ops.finalize_irp(irp)?;
    }

    irp.status().map(|_| irp.transferred())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_buffer_take() {
        let buf = IrpBuffer::for_read(8);
        if let IrpBuffer::Read(inner) = &buf {
            inner.lock().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        }
        assert_eq!(buf.take_read(), alloc::vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
