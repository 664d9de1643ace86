//! Cross-subsystem integration tests

#![cfg(test)]

use alloc::sync::Arc;

use crate::error::Status;
use crate::fs::fd::{self, OpenFlags};
use crate::fs::mount;
use crate::fs::ramfs::RamFs;
use crate::mm::context::{verify_invariants, MmContext};
use crate::mm::fault::{self, FaultReason};
use crate::mm::page::Protection;
use crate::mm::vmm::{self, FileBacking, VmaFlags};
use crate::mm::FRAME_SIZE;

fn setup() {
    crate::test_support::init();
}

fn mount_fresh(name: &str, at: &str) {
    crate::fs::mkdir(at, 0o755).unwrap();
    let driver = crate::driver::registry::register_driver(name, RamFs::new(), true).unwrap();
    mount::mount(at, None, Some(driver)).unwrap();
}

fn file_backing(file: &Arc<fd::OpenFile>, writable: bool) -> FileBacking {
    FileBacking {
        cache: file.vn.pagecache.clone(),
        offset: 0,
        len: file.vn.size(),
        writable,
    }
}

mod file_mapping_tests {
    use super::*;

    #[test]
    fn shared_mapping_reads_file_contents() {
        setup();
        mount_fresh("ramfs-map1", "/map1");
        let file = fd::open(
            "/map1/f",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        file.write(b"mapped file contents").unwrap();

        let ctx = MmContext::new(1).unwrap();
        let base = vmm::alloc(
            &ctx,
            None,
            file.vn.size() as usize,
            Protection::RW,
            VmaFlags::PREFAULT,
            Some(file_backing(&file, true)),
        )
        .unwrap();

        let phys = ctx.lock().find(base).unwrap().phys;
        let mut buf = [0u8; 20];
        crate::mm::read_phys(phys, &mut buf);
        assert_eq!(&buf, b"mapped file contents");
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }

    #[test]
    fn private_cow_write_leaves_the_cache_unchanged() {
        setup();
        mount_fresh("ramfs-cow", "/cow");
        let file = fd::open(
            "/cow/f",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        file.write(b"original bytes!!").unwrap();

        let ctx = MmContext::new(1).unwrap();
        let base = vmm::alloc(
            &ctx,
            None,
            16,
            Protection::RW,
            VmaFlags::PRIVATE,
            Some(file_backing(&file, true)),
        )
        .unwrap();

        // Before the write the mapping aliases the cache frame,
        // write-protected.
        let (phys_before, prot_before) = {
            let inner = ctx.lock();
            let desc = inner.find(base).unwrap();
            (desc.phys, desc.prot)
        };
        assert!(!prot_before.contains(Protection::RW));
        let mut buf = [0u8; 16];
        crate::mm::read_phys(phys_before, &mut buf);
        assert_eq!(&buf, b"original bytes!!");

        // Write fault: the copy splits off a private frame.
        fault::fault(&ctx, base, FaultReason::WRITE | FaultReason::PRESENT).unwrap();
        let phys_after = ctx.lock().find(base).unwrap().phys;
        assert_ne!(phys_after, phys_before);
        crate::mm::write_phys(phys_after, b"scribbled over!!");

        // The page cache (and any other reader of it) is untouched.
        let mut cache_bytes = [0u8; 16];
        file.vn.pagecache.peek(0, &mut cache_bytes).unwrap();
        assert_eq!(&cache_bytes, b"original bytes!!");

        let mut via_read = [0u8; 16];
        let n = fd::read_at(&file.vn, 0, &mut via_read, OpenFlags::READ).unwrap();
        assert_eq!(&via_read[..n], b"original bytes!!");

        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
        verify_invariants(&ctx).unwrap();
    }
}

mod fork_tests {
    use super::*;
    use crate::sched::process::Process;
    use crate::syscall::handle::Handle;

    #[test]
    fn forked_fd_table_is_independent() {
        let parent = crate::test_support::adopt_process();
        mount_fresh("ramfs-fork", "/fork");
        let file = fd::open(
            "/fork/f",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        file.write(b"0123456789").unwrap();
        file.seek(2, fd::SeekFrom::Set).unwrap();
        let fd_id = parent.handles.lock().insert(Handle::File(file));

        let child_mm = MmContext::new(0).unwrap();
        let child = Process::fork_from(&parent, child_mm);

        // Parent closes; the child's duplicated description survives
        // with the offset it had at fork time.
        parent.handles.lock().close(fd_id).unwrap();
        let child_file = child.handles.lock().file(fd_id).unwrap();
        assert_eq!(child_file.offset(), 2);
        let mut buf = [0u8; 4];
        assert_eq!(child_file.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"2345");
        crate::test_support::drop_process();
    }
}

mod tlb_tests {
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn shootdown_reaches_cpus_running_the_context() {
        setup();
        let ctx = Arc::new(MmContext::new(1).unwrap());
        let base = vmm::alloc(&ctx, None, FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();

        let root = ctx.page_table_root();
        let (to_b, from_main) = std::sync::mpsc::channel::<()>();
        let (to_main, from_b) = std::sync::mpsc::channel::<u64>();

        let handle = std::thread::spawn(move || {
            // This OS thread models CPU B, running a thread of the
            // target context.
            let cpu = crate::sched::cpu::current_cpu();
            let thr = crate::sched::thread::Thread::allocate();
            thr.context.lock().cr3 = root;
            thr.set_state(crate::sched::thread::ThreadState::Running);
            cpu.set_current(Some(thr));

            to_main.send(cpu.tlb_generation.load(Ordering::SeqCst)).unwrap();
            from_main.recv().unwrap(); // wait for the protect
            let after = cpu.tlb_generation.load(Ordering::SeqCst);
            cpu.set_current(None);
            after
        });

        let before = from_b.recv().unwrap();
        // Revoking write access must invalidate CPU B's cached
        // translations before protect returns.
        vmm::protect(&ctx, base, FRAME_SIZE, Protection::empty(), None).unwrap();
        to_b.send(()).unwrap();
        let after = handle.join().unwrap();
        assert!(after > before, "remote CPU never drained the shootdown");

        assert_eq!(
            fault::fault(&ctx, base, FaultReason::WRITE | FaultReason::PRESENT),
            Err(Status::AccessDenied)
        );
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }

    #[test]
    fn kernel_global_shootdown_reaches_everyone() {
        setup();
        let me = crate::sched::cpu::current_cpu();
        let other_cpu_gen = std::thread::spawn(|| {
            let cpu = crate::sched::cpu::current_cpu();
            (cpu.id(), cpu.tlb_generation.load(Ordering::SeqCst))
        })
        .join()
        .unwrap();

        crate::arch::tlb::tlb_shootdown(0, 0xFFFF_9000_0000_0000, FRAME_SIZE);

        let my_gen = me.tlb_generation.load(Ordering::SeqCst);
        assert!(my_gen > 0);
        if let Some(other) = crate::sched::cpu::cpu_by_id(other_cpu_gen.0) {
            assert!(other.tlb_generation.load(Ordering::SeqCst) > other_cpu_gen.1);
        }
    }
}

mod stats_tests {
    use super::*;

    #[test]
    fn committed_tracks_every_sequence_of_operations() {
        setup();
        let ctx = MmContext::new(1).unwrap();
        let a = vmm::alloc(&ctx, None, 2 * FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        let b = vmm::alloc(
            &ctx,
            None,
            3 * FRAME_SIZE,
            Protection::RW,
            VmaFlags::GUARD_PAGE,
            None,
        )
        .unwrap();
        verify_invariants(&ctx).unwrap();
        assert_eq!(ctx.stats().committed, 2 * FRAME_SIZE + 4 * FRAME_SIZE);

        vmm::protect(&ctx, a, FRAME_SIZE, Protection::empty(), Some(false)).unwrap();
        verify_invariants(&ctx).unwrap();

        vmm::free(&ctx, a, 2 * FRAME_SIZE).unwrap();
        verify_invariants(&ctx).unwrap();
        vmm::free(&ctx, b, 3 * FRAME_SIZE).unwrap();
        verify_invariants(&ctx).unwrap();
        assert_eq!(ctx.stats().committed, 0);
        assert_eq!(ctx.stats().pageable, 0);
        assert_eq!(ctx.stats().non_paged, 0);
    }
}
