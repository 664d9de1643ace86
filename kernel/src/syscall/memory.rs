//! VMM syscalls

use super::current_process;
use crate::error::{Result, Status};
use crate::mm::page::Protection;
use crate::mm::usercopy;
use crate::mm::vmm::{self, VmaFlags};

// User-visible protection bits.
const PROT_READ: usize = 1;
const PROT_WRITE: usize = 2;
const PROT_EXEC: usize = 4;

fn prot_from_user(raw: usize) -> Result<Protection> {
    if raw & !(PROT_READ | PROT_WRITE | PROT_EXEC) != 0 {
        return Err(Status::InvalidArgument);
    }
    let mut prot = Protection::USER;
    if raw & PROT_WRITE != 0 {
        prot |= Protection::RW;
    }
    if raw & PROT_EXEC != 0 {
        prot |= Protection::EXEC;
    }
    Ok(prot)
}

pub(super) fn dispatch(nr: usize, args: [usize; 6]) -> Result<usize> {
    let proc = current_process()?;
    match nr {
        super::SYS_VIRTUAL_ALLOC => {
            let hint = if args[0] == 0 { None } else { Some(args[0]) };
            let prot = prot_from_user(args[2])?;
            // User code never gets the kernel-only flags.
            let flags = VmaFlags::from_bits_truncate(args[3] as u32)
                - (VmaFlags::NON_PAGED | VmaFlags::KERNEL_STACK);
            let file = if args[4] != 0 {
                let open = proc.handles.lock().file(args[4] as u32)?;
                Some(vmm::FileBacking {
                    cache: open.vn.pagecache.clone(),
                    offset: open.offset(),
                    len: open.vn.size().saturating_sub(open.offset()),
                    writable: open.flags.contains(crate::fs::fd::OpenFlags::WRITE),
                })
            } else {
                None
            };
            vmm::alloc(&proc.mm, hint, args[1], prot, flags, file)
        }
        super::SYS_VIRTUAL_FREE => {
            vmm::free(&proc.mm, args[0], args[1])?;
            Ok(0)
        }
        super::SYS_VIRTUAL_PROTECT => {
            let prot = prot_from_user(args[2])?;
            vmm::protect(&proc.mm, args[0], args[1], prot, None)?;
            Ok(0)
        }
        super::SYS_MAP_VIEW_OF_USER_MEMORY => {
            // Validate + fault in the view; the chunk count tells the
            // caller how fragmented it is.
            let view =
                usercopy::map_view_of_user_memory(&proc.mm, args[0], args[1], args[2] != 0)?;
            Ok(view.chunks.len())
        }
        _ => Err(Status::Unimplemented),
    }
}
