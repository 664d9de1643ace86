//! Driver model and IRP lifecycle tests

#![cfg(test)]

use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};

use super::irp::{self, Irp, IrpBuffer, IrpOp};
use super::registry;
use super::DriverOps;
use crate::error::{Result, Status};
use crate::sync::event::Event;

/// Driver that completes reads synchronously with a fixed byte.
struct SyncDriver;

impl DriverOps for SyncDriver {
    fn name(&self) -> &str {
        "test-sync"
    }

    fn read_sync(&self, _desc: u64, buf: &mut [u8], _off: u64) -> Result<usize> {
        buf.fill(0x5A);
        Ok(buf.len())
    }

    fn submit_irp(&self, irp: &Arc<Irp>) -> Result<()> {
        if let IrpBuffer::Read(buf) = &irp.buffer {
            let mut data = buf.lock();
            let n = data.len();
            data.fill(0x5A);
            irp.set_transferred(n);
        }
        irp.set_status(Ok(()));
        Ok(())
    }
}

/// Driver that arms an event and needs one retry before the data lands.
struct RetryDriver {
    finalizes: AtomicUsize,
}

impl DriverOps for RetryDriver {
    fn name(&self) -> &str {
        "test-retry"
    }

    fn read_sync(&self, _desc: u64, _buf: &mut [u8], _off: u64) -> Result<usize> {
        Err(Status::Unimplemented)
    }

    fn submit_irp(&self, irp: &Arc<Irp>) -> Result<()> {
        let event = Arc::new(Event::notification());
        event.set(); // data "arrives" immediately in the test
        let rounds = AtomicUsize::new(0);
        irp.arm(
            event,
            Box::new(move |irp: &Arc<Irp>| {
                if rounds.fetch_add(1, Ordering::Relaxed) == 0 {
                    // First wake delivers only half; ask for another
                    // wait cycle.
                    if let IrpBuffer::Read(buf) = &irp.buffer {
                        let mut data = buf.lock();
                        let half = data.len() / 2;
                        data[..half].fill(0x11);
                        irp.set_transferred(half);
                    }
                    // Re-arm for the next round.
                    if let Some(event) = irp.completion_event() {
                        event.set();
                    }
                    return Err(Status::IrpRetry);
                }
                if let IrpBuffer::Read(buf) = &irp.buffer {
                    let mut data = buf.lock();
                    let half = data.len() / 2;
                    let len = data.len();
                    data[half..].fill(0x22);
                    irp.set_transferred(len);
                }
                Ok(())
            }),
        );
        Ok(())
    }

    fn finalize_irp(&self, _irp: &Arc<Irp>) -> Result<()> {
        self.finalizes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Driver whose completion never fires; only the detach event can end
/// the wait.
struct StuckDriver {
    finalizes: AtomicUsize,
}

impl DriverOps for StuckDriver {
    fn name(&self) -> &str {
        "test-stuck"
    }

    fn read_sync(&self, _desc: u64, _buf: &mut [u8], _off: u64) -> Result<usize> {
        Err(Status::Unimplemented)
    }

    fn submit_irp(&self, irp: &Arc<Irp>) -> Result<()> {
        irp.arm(
            Arc::new(Event::notification()),
            Box::new(|_irp: &Arc<Irp>| Ok(())),
        );
        Ok(())
    }

    fn finalize_irp(&self, _irp: &Arc<Irp>) -> Result<()> {
        self.finalizes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

mod irp_tests {
    use super::*;

    #[test]
    fn synchronous_completion_skips_wait() {
        let driver = SyncDriver;
        let irp = Irp::new(None, 0, IrpOp::Read, 0, 8, IrpBuffer::for_read(8));
        let n = irp::run(&driver, &irp).unwrap();
        assert_eq!(n, 8);
        assert_eq!(irp.buffer.take_read(), alloc::vec![0x5A; 8]);
    }

    #[test]
    fn retry_loop_runs_callback_until_done() {
        let driver = RetryDriver {
            finalizes: AtomicUsize::new(0),
        };
        let irp = Irp::new(None, 0, IrpOp::Read, 0, 8, IrpBuffer::for_read(8));
        let n = irp::run(&driver, &irp).unwrap();
        assert_eq!(n, 8);
        let data = irp.buffer.take_read();
        assert_eq!(&data[..4], &[0x11; 4]);
        assert_eq!(&data[4..], &[0x22; 4]);
        assert_eq!(driver.finalizes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn detach_event_aborts_with_single_finalize() {
        let driver = StuckDriver {
            finalizes: AtomicUsize::new(0),
        };
        let irp = Irp::new(None, 0, IrpOp::Read, 0, 8, IrpBuffer::for_read(8));
        let detach = Arc::new(Event::notification());
        detach.set(); // device already gone before the wait
        irp.set_detach_event(detach);
        assert_eq!(irp::run(&driver, &irp), Err(Status::Aborted));
        assert_eq!(driver.finalizes.load(Ordering::Relaxed), 1);
    }
}

mod registry_tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        crate::test_support::init();
        registry::register_driver("dup-test", Arc::new(SyncDriver), false).unwrap();
        assert!(registry::register_driver("dup-test", Arc::new(SyncDriver), false).is_err());
    }

    #[test]
    fn symbols_resolve_across_drivers() {
        crate::test_support::init();
        let driver =
            registry::register_driver("sym-test", Arc::new(SyncDriver), false).unwrap();
        driver.export_symbol("sym_entry", 0xDEAD);
        let (owner, value) = registry::resolve_symbol("sym_entry").unwrap();
        assert_eq!(owner.name, "sym-test");
        assert_eq!(value, 0xDEAD);
        assert!(registry::resolve_symbol("missing_symbol").is_none());
    }

    #[test]
    fn optional_slots_report_unimplemented() {
        let driver = SyncDriver;
        assert_eq!(driver.get_max_blk_count(0), Err(Status::Unimplemented));
        assert_eq!(driver.path_search(0, "x"), Err(Status::NotFound));
        assert_eq!(driver.get_blk_size(0), Ok(1));
    }
}
