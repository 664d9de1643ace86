//! VFS tests

#![cfg(test)]

use alloc::{string::String, sync::Arc, vec::Vec};

use super::dirent::{self, dirent_path};
use super::fd::{self, OpenFlags, SeekFrom};
use super::ramfs::RamFs;
use super::vnode::VnodeType;
use super::{mount, tty};
use crate::driver::registry;
use crate::error::Status;

fn setup() {
    crate::test_support::init();
}

/// Register a uniquely named ramfs instance for a test mount.
fn new_ramfs(name: &str) -> Arc<crate::driver::registry::DriverObject> {
    registry::register_driver(name, RamFs::new(), true)
        .or_else(|_| registry::find_driver(name).ok_or(Status::NotFound))
        .unwrap()
}

mod path_tests {
    use super::*;

    #[test]
    fn lookup_canonicalizes_dot_and_dotdot() {
        setup();
        super::super::mkdir("/pt", 0o755).unwrap();
        super::super::mkdir("/pt/a", 0o755).unwrap();
        super::super::mkdir("/pt/a/b", 0o755).unwrap();

        let dent = dirent::lookup("/pt/./a/b/../b").unwrap();
        assert_eq!(dirent_path(&dent), "/pt/a/b");

        let via_root = dirent::lookup("/pt/a/../../pt/a").unwrap();
        assert_eq!(dirent_path(&via_root), "/pt/a");
    }

    #[test]
    fn dotdot_never_crosses_the_root() {
        setup();
        let dent = dirent::lookup("/../../..").unwrap();
        assert_eq!(dirent_path(&dent), "/");
    }

    #[test]
    fn empty_components_are_skipped() {
        setup();
        super::super::mkdir("/ec", 0o755).unwrap();
        let dent = dirent::lookup("//ec///").unwrap();
        assert_eq!(dirent_path(&dent), "/ec");
    }

    #[test]
    fn missing_component_is_not_found() {
        setup();
        assert_eq!(
            dirent::lookup("/no/such/path").map(|_| ()),
            Err(Status::NotFound)
        );
    }

    #[test]
    fn symlink_resolves_relative_to_its_parent() {
        setup();
        super::super::mkdir("/sl", 0o755).unwrap();
        super::super::mkdir("/sl/real", 0o755).unwrap();
        super::super::symlink("real", "/sl/alias").unwrap();

        let dent = dirent::lookup("/sl/alias").unwrap();
        assert_eq!(dirent_path(&dent), "/sl/real");
        assert_eq!(super::super::readlink("/sl/alias").unwrap(), "real");
    }

    #[test]
    fn symlink_loops_are_bounded() {
        setup();
        super::super::mkdir("/loop", 0o755).unwrap();
        super::super::symlink("b", "/loop/a").unwrap();
        super::super::symlink("a", "/loop/b").unwrap();
        assert_eq!(
            dirent::lookup("/loop/a").map(|_| ()),
            Err(Status::SymlinkLoop)
        );
    }
}

mod mount_tests {
    use super::*;

    #[test]
    fn crossing_into_a_mount_and_back() {
        setup();
        super::super::mkdir("/mc", 0o755).unwrap();
        super::super::mkdir("/mc/inner", 0o755).unwrap();
        let fs2 = new_ramfs("ramfs-mc");
        mount::mount("/mc/inner", None, Some(fs2)).unwrap();

        // Components after the mountpoint resolve in fs2.
        let file = fd::open(
            "/mc/inner/x",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        drop(file);
        let dent = dirent::lookup("/mc/inner/x").unwrap();
        assert_eq!(dirent_path(&dent), "/mc/inner/x");

        // `..` from the top of the mount lands in the covering tree.
        let up = dirent::lookup("/mc/inner/..").unwrap();
        assert_eq!(dirent_path(&up), "/mc");
    }

    #[test]
    fn mount_on_non_directory_is_refused() {
        setup();
        super::super::mkdir("/mnd", 0o755).unwrap();
        let f = fd::open(
            "/mnd/file",
            OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        drop(f);
        let fs2 = new_ramfs("ramfs-mnd");
        assert_eq!(
            mount::mount("/mnd/file", None, Some(fs2)).map(|_| ()),
            Err(Status::NotADirectory)
        );
    }

    #[test]
    fn double_mount_is_refused() {
        setup();
        super::super::mkdir("/dm", 0o755).unwrap();
        mount::mount("/dm", None, Some(new_ramfs("ramfs-dm1"))).unwrap();
        assert_eq!(
            mount::mount("/dm", None, Some(new_ramfs("ramfs-dm2"))).map(|_| ()),
            Err(Status::InUse)
        );
    }
}

mod file_tests {
    use super::*;

    #[test]
    fn write_seek_read_round_trip() {
        setup();
        super::super::mkdir("/ft", 0o755).unwrap();
        mount::mount("/ft", None, Some(new_ramfs("ramfs-ft"))).unwrap();

        let file = fd::open(
            "/ft/x",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        assert_eq!(file.write(b"hello world\n").unwrap(), 12);
        assert_eq!(file.seek(0, SeekFrom::Set).unwrap(), 0);
        let mut buf = [0u8; 12];
        assert_eq!(file.read(&mut buf).unwrap(), 12);
        assert_eq!(&buf, b"hello world\n");
        assert_eq!(file.vn.size(), 12);
    }

    #[test]
    fn uncached_read_matches_cached() {
        setup();
        super::super::mkdir("/uc", 0o755).unwrap();
        mount::mount("/uc", None, Some(new_ramfs("ramfs-uc"))).unwrap();
        let file = fd::open(
            "/uc/f",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        file.write(b"uncached bytes").unwrap();

        let direct = fd::open("/uc/f", OpenFlags::READ | OpenFlags::UNCACHED, 0).unwrap();
        let mut buf = [0u8; 14];
        assert_eq!(direct.read(&mut buf).unwrap(), 14);
        assert_eq!(&buf, b"uncached bytes");
    }

    #[test]
    fn duplicate_keeps_independent_offsets() {
        setup();
        super::super::mkdir("/dup", 0o755).unwrap();
        mount::mount("/dup", None, Some(new_ramfs("ramfs-dup"))).unwrap();
        let a = fd::open(
            "/dup/f",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        a.write(b"0123456789").unwrap();
        a.seek(4, SeekFrom::Set).unwrap();

        let b = a.duplicate();
        assert_eq!(b.offset(), 4);
        a.seek(0, SeekFrom::Set).unwrap();
        assert_eq!(b.offset(), 4, "duplicated offset is independent");

        let mut buf = [0u8; 6];
        assert_eq!(b.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"456789");
    }

    #[test]
    fn unlink_and_rename() {
        setup();
        super::super::mkdir("/ur", 0o755).unwrap();
        mount::mount("/ur", None, Some(new_ramfs("ramfs-ur"))).unwrap();
        let f = fd::open(
            "/ur/old",
            OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        drop(f);

        super::super::rename("/ur/old", "/ur/new").unwrap();
        assert!(dirent::lookup("/ur/old").is_err());
        assert!(dirent::lookup("/ur/new").is_ok());

        super::super::unlink("/ur/new").unwrap();
        assert!(dirent::lookup("/ur/new").is_err());
    }

    #[test]
    fn append_mode_writes_at_end() {
        setup();
        super::super::mkdir("/ap", 0o755).unwrap();
        mount::mount("/ap", None, Some(new_ramfs("ramfs-ap"))).unwrap();
        let f = fd::open(
            "/ap/f",
            OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE,
            0o644,
        )
        .unwrap();
        f.write(b"head").unwrap();
        let g = fd::open(
            "/ap/f",
            OpenFlags::WRITE | OpenFlags::APPEND,
            0,
        )
        .unwrap();
        g.write(b"-tail").unwrap();
        f.seek(0, SeekFrom::Set).unwrap();
        let mut buf = [0u8; 9];
        assert_eq!(f.read(&mut buf).unwrap(), 9);
        assert_eq!(&buf, b"head-tail");
    }
}

mod access_tests {
    use super::*;
    use crate::sched::process::Credentials;

    #[test]
    fn owner_group_other_triads() {
        setup();
        super::super::mkdir("/ac", 0o755).unwrap();
        mount::mount("/ac", None, Some(new_ramfs("ramfs-ac"))).unwrap();
        let f = fd::open(
            "/ac/f",
            OpenFlags::WRITE | OpenFlags::CREATE,
            0o640,
        )
        .unwrap();
        let vn = f.vn.clone();
        {
            let mut attr = vn.attr.write();
            attr.uid = 100;
            attr.gid = 200;
            attr.mode = 0o640;
        }

        let owner = Credentials {
            uid: 100,
            gid: 1,
            euid: 100,
            egid: 1,
            groups: Vec::new(),
        };
        assert!(fd::access(&vn, &owner, true, true, false).is_ok());

        let group_member = Credentials {
            uid: 101,
            gid: 1,
            euid: 101,
            egid: 1,
            groups: alloc::vec![200],
        };
        assert!(fd::access(&vn, &group_member, true, false, false).is_ok());
        assert_eq!(
            fd::access(&vn, &group_member, false, true, false),
            Err(Status::AccessDenied)
        );

        let other = Credentials {
            uid: 102,
            gid: 2,
            euid: 102,
            egid: 2,
            groups: Vec::new(),
        };
        assert_eq!(
            fd::access(&vn, &other, true, false, false),
            Err(Status::AccessDenied)
        );

        // uid 0 short-circuits everything.
        assert!(fd::access(&vn, &Credentials::root(), true, true, true).is_ok());
    }
}

mod readdir_tests {
    use super::*;
    use crate::driver::{DirItem, DriverOps, DriverVnodeInfo, IterDecision};
    use crate::driver::irp::Irp;
    use crate::error::Result;

    /// Mock FAT-style driver: fixed entries plus whatever mk_file adds.
    struct MockFat {
        entries: spin::Mutex<Vec<String>>,
    }

    impl DriverOps for MockFat {
        fn name(&self) -> &str {
            "mock-fat"
        }

        fn read_sync(&self, _desc: u64, _buf: &mut [u8], _off: u64) -> Result<usize> {
            Ok(0)
        }

        fn submit_irp(&self, irp: &Arc<Irp>) -> Result<()> {
            irp.set_status(Ok(()));
            Ok(())
        }

        fn probe(&self, _dev: &Arc<super::super::vnode::Vnode>) -> bool {
            true
        }

        fn root_desc(&self, _dev: Option<&Arc<super::super::vnode::Vnode>>) -> Result<u64> {
            Ok(0)
        }

        fn vnode_info(&self, desc: u64) -> Result<DriverVnodeInfo> {
            Ok(DriverVnodeInfo {
                vtype: if desc == 0 {
                    VnodeType::Directory
                } else {
                    VnodeType::Regular
                },
                size: 0,
                blk_size: 512,
                inode: desc + 1,
                uid: 0,
                gid: 0,
                mode: 0o755,
            })
        }

        fn path_search(&self, _parent: u64, name: &str) -> Result<u64> {
            let entries = self.entries.lock();
            entries
                .iter()
                .position(|e| e == name)
                .map(|i| i as u64 + 1)
                .ok_or(Status::NotFound)
        }

        fn list_dir(
            &self,
            _desc: u64,
            cb: &mut dyn FnMut(&DirItem) -> IterDecision,
        ) -> Result<()> {
            for (i, name) in self.entries.lock().iter().enumerate() {
                let item = DirItem {
                    name: name.clone(),
                    inode: i as u64 + 1,
                    vtype: VnodeType::Regular,
                    desc: i as u64 + 1,
                };
                if cb(&item) == IterDecision::Stop {
                    break;
                }
            }
            Ok(())
        }

        fn mk_file(
            &self,
            _parent: u64,
            name: &str,
            _vtype: VnodeType,
            _mode: u16,
        ) -> Result<u64> {
            let mut entries = self.entries.lock();
            entries.push(String::from(name));
            Ok(entries.len() as u64)
        }
    }

    fn record_names(buf: &[u8], len: usize) -> Vec<String> {
        let mut names = Vec::new();
        let mut off = 0;
        while off < len {
            let reclen = u16::from_le_bytes([buf[off + 16], buf[off + 17]]) as usize;
            let name_bytes = &buf[off + 19..off + reclen - 1];
            names.push(String::from_utf8(name_bytes.to_vec()).unwrap());
            off += reclen;
        }
        names
    }

    #[test]
    fn read_entries_reflects_mk_file() {
        setup();
        let driver = registry::register_driver(
            "mock-fat",
            Arc::new(MockFat {
                entries: spin::Mutex::new(alloc::vec![
                    String::from("BOOT.CFG"),
                    String::from("KERNEL.SYS"),
                ]),
            }),
            true,
        )
        .unwrap();
        super::super::mkdir("/fat", 0o755).unwrap();
        mount::mount("/fat", None, Some(driver.clone())).unwrap();

        let dent = dirent::lookup("/fat").unwrap();
        let mut buf = [0u8; 512];
        let (written, next) = fd::read_entries(&dent, &mut buf, 0).unwrap();
        assert_eq!(next, 2);
        assert_eq!(
            record_names(&buf, written),
            alloc::vec![String::from("BOOT.CFG"), String::from("KERNEL.SYS")]
        );

        driver
            .ops
            .mk_file(0, "NEW.TXT", VnodeType::Regular, 0o644)
            .unwrap();
        let (written, next) = fd::read_entries(&dent, &mut buf, 0).unwrap();
        assert_eq!(next, 3);
        assert!(record_names(&buf, written).contains(&String::from("NEW.TXT")));
    }
}

mod tty_tests {
    use super::*;
    use tty::{LocalFlags, Termios};

    #[test]
    fn canonical_line_editing_with_erase() {
        setup();
        let t = tty::Tty::new();
        t.input_bytes(b"helx");
        t.input_bytes(&[0x7F]); // VERASE kills the x
        t.input_bytes(b"lo\n");

        let mut buf = [0u8; 16];
        let n = t.read(&mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"hello\n");
    }

    #[test]
    fn kill_discards_the_line() {
        let t = tty::Tty::new();
        t.input_bytes(b"garbage");
        t.input_bytes(&[0x15]); // VKILL
        t.input_bytes(b"ok\n");
        let mut buf = [0u8; 8];
        let n = t.read(&mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"ok\n");
    }

    #[test]
    fn incomplete_line_does_not_read() {
        let t = tty::Tty::new();
        t.input_bytes(b"partial");
        let mut buf = [0u8; 8];
        assert_eq!(t.read(&mut buf, true), Err(Status::WouldBlock));
    }

    #[test]
    fn raw_mode_delivers_immediately() {
        let t = tty::Tty::new();
        let mut raw = Termios::cooked();
        raw.lflag -= LocalFlags::ICANON;
        let bytes = raw.to_bytes();
        let mut arg = bytes.to_vec();
        t.ioctl(tty::TCSETS, &mut arg).unwrap();

        t.input_bytes(b"k");
        let mut buf = [0u8; 4];
        assert_eq!(t.read(&mut buf, true).unwrap(), 1);
        assert_eq!(buf[0], b'k');
    }

    #[test]
    fn vintr_signals_foreground_pgrp() {
        let proc = crate::test_support::adopt_process();
        let t = tty::Tty::new();
        t.set_foreground_pgrp(proc.pgrp.load(core::sync::atomic::Ordering::Relaxed));
        t.input_bytes(&[0x03]); // ^C
        let thread = proc.first_thread().unwrap();
        assert!(thread.has_signal(2), "SIGINT pending on the fg pgrp");
        crate::test_support::drop_process();
    }

    #[test]
    fn flow_control_holds_output() {
        let t = tty::Tty::new();
        let captured = Arc::new(spin::Mutex::new(Vec::new()));
        struct Sink(Arc<spin::Mutex<Vec<u8>>>);
        impl tty::TtyOutput for Sink {
            fn write(&self, bytes: &[u8]) {
                self.0.lock().extend_from_slice(bytes);
            }
        }
        t.set_sink(alloc::boxed::Box::new(Sink(captured.clone())));

        t.input_bytes(&[0x13]); // ^S stop
        t.write(b"held").unwrap();
        assert!(captured.lock().is_empty());
        t.input_bytes(&[0x11]); // ^Q resume
        assert_eq!(&*captured.lock(), b"held");
    }

    #[test]
    fn termios_ioctl_round_trip() {
        let t = tty::Tty::new();
        let mut out = [0u8; Termios::WIRE_SIZE];
        t.ioctl(tty::TCGETS, &mut out).unwrap();
        let parsed = Termios::from_bytes(&out).unwrap();
        assert!(parsed.lflag.contains(LocalFlags::ICANON));

        let mut winsz = [0u8; 4];
        t.ioctl(tty::TIOCGWINSZ, &mut winsz).unwrap();
        assert_eq!(u16::from_le_bytes([winsz[0], winsz[1]]), 25);
    }

    #[test]
    fn pty_pair_echoes_through_master() {
        let (master, sub) = tty::create_pty();
        master.unlock();
        // Typed input echoes back to the master side raw.
        master.write(b"hi\n").unwrap();
        let mut buf = [0u8; 8];
        let n = master.read(&mut buf, true).unwrap();
        assert_eq!(&buf[..n], b"hi\n");
        // The subordinate sees the cooked line.
        let mut line = [0u8; 8];
        let n = sub.read(&mut line, true).unwrap();
        assert_eq!(&line[..n], b"hi\n");
    }
}
