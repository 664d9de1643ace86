//! Syscall boundary tests

#![cfg(test)]

use super::handle::{Handle, HandleTable};
use super::*;
use crate::fs::fd::{OpenFlags, SeekFrom};
use crate::mm::page::Protection;
use crate::mm::usercopy;
use crate::mm::vmm::{self, VmaFlags};

mod handle_tests {
    use super::*;
    use crate::sched::thread::Thread;

    #[test]
    fn lowest_free_slot_allocation() {
        crate::test_support::init();
        let mut table = HandleTable::new();
        let t0 = table.insert(Handle::Thread(Thread::allocate()));
        let t1 = table.insert(Handle::Thread(Thread::allocate()));
        assert_eq!((t0, t1), (0, 1));
        table.close(0).unwrap();
        let t2 = table.insert(Handle::Thread(Thread::allocate()));
        assert_eq!(t2, 0, "freed slot is reused first");
    }

    #[test]
    fn type_tag_mismatch_refuses() {
        crate::test_support::init();
        let mut table = HandleTable::new();
        let id = table.insert(Handle::Thread(Thread::allocate()));
        assert_eq!(table.file(id), Err(Status::InvalidArgument));
        assert_eq!(table.thread(id).map(|_| ()), Ok(()));
        assert_eq!(table.process(99), Err(Status::NotFound));
    }
}

mod dispatch_tests {
    use super::*;

    /// Place a NUL-terminated string into the process's user memory.
    fn stage_user_string(proc: &alloc::sync::Arc<crate::sched::process::Process>, s: &str) -> usize {
        let base = vmm::alloc(
            &proc.mm,
            None,
            crate::mm::FRAME_SIZE,
            Protection::RW | Protection::USER,
            VmaFlags::empty(),
            None,
        )
        .unwrap();
        let mut bytes = alloc::vec::Vec::from(s.as_bytes());
        bytes.push(0);
        usercopy::copy_to_user(&proc.mm, base, &bytes).unwrap();
        base
    }

    fn stage_user_buffer(
        proc: &alloc::sync::Arc<crate::sched::process::Process>,
        len: usize,
    ) -> usize {
        vmm::alloc(
            &proc.mm,
            None,
            len.next_multiple_of(crate::mm::FRAME_SIZE),
            Protection::RW | Protection::USER,
            VmaFlags::empty(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn open_write_read_through_the_boundary() {
        let proc = crate::test_support::adopt_process();
        crate::fs::mkdir("/sys-t", 0o755).ok();

        let path = stage_user_string(&proc, "/sys-t/file");
        let flags = (OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).bits() as usize;
        let fd = dispatch(SYS_OPEN, [path, flags, 0o644, 0, 0, 0]);
        assert!(fd >= 0, "open failed: {}", fd);

        let data = stage_user_buffer(&proc, 64);
        usercopy::copy_to_user(&proc.mm, data, b"boundary bytes").unwrap();
        let written = dispatch(SYS_WRITE, [fd as usize, data, 14, 0, 0, 0]);
        assert_eq!(written, 14);

        assert_eq!(dispatch(SYS_SEEK, [fd as usize, 0, 0, 0, 0, 0]), 0);
        let readback = stage_user_buffer(&proc, 64);
        let n = dispatch(SYS_READ, [fd as usize, readback, 14, 0, 0, 0]);
        assert_eq!(n, 14);
        let mut buf = [0u8; 14];
        usercopy::copy_from_user(&proc.mm, readback, &mut buf).unwrap();
        assert_eq!(&buf, b"boundary bytes");

        assert_eq!(dispatch(SYS_CLOSE, [fd as usize, 0, 0, 0, 0, 0]), 0);
        // Closed handles refuse further operations.
        assert!(dispatch(SYS_READ, [fd as usize, readback, 1, 0, 0, 0]) < 0);
        crate::test_support::drop_process();
    }

    #[test]
    fn invalid_syscall_number_is_enosys() {
        crate::test_support::adopt_process();
        assert_eq!(dispatch(0xFFFF, [0; 6]), -(Status::Unimplemented.errno() as isize));
        crate::test_support::drop_process();
    }

    #[test]
    fn bad_user_pointer_is_efault_or_einval() {
        let _proc = crate::test_support::adopt_process();
        let r = dispatch(SYS_OPEN, [0, 0, 0, 0, 0, 0]);
        assert!(r < 0);
        crate::test_support::drop_process();
    }

    #[test]
    fn virtual_alloc_and_free_syscalls() {
        let proc = crate::test_support::adopt_process();
        let base = dispatch(SYS_VIRTUAL_ALLOC, [0, 0x3000, 3 /* rw */, 0, 0, 0]);
        assert!(base > 0);
        let committed = proc.mm.stats().committed;
        assert!(committed >= 0x3000);
        assert_eq!(
            dispatch(SYS_VIRTUAL_FREE, [base as usize, 0x3000, 0, 0, 0, 0]),
            0
        );
        crate::test_support::drop_process();
    }

    #[test]
    fn getpid_and_exit_status_flow() {
        let proc = crate::test_support::adopt_process();
        assert_eq!(dispatch(SYS_PROCESS_GET_PID, [0; 6]), proc.pid as isize);
        crate::test_support::drop_process();
    }
}

mod seek_compat {
    use super::*;

    #[test]
    fn seek_whence_values_match_posix() {
        // The dispatch table maps 0/1/2 onto Set/Current/End.
        assert_eq!(SeekFrom::Set as u8, 0);
        assert_eq!(SeekFrom::Current as u8, 1);
        assert_eq!(SeekFrom::End as u8, 2);
    }
}
